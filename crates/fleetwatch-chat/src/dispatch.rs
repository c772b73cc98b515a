//! Outbound chat dispatcher: credential fallback, rate limiting/dedup,
//! chunking, and transport, exactly spec.md §4.7's five-step pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use fleetwatch_db::queries::chat_messages;

use crate::bot_type::BotType;
use crate::transport::{ParseMode, SendMessageBody};

const MAX_CHUNK_LEN: usize = 4000;
const CHUNK_PAUSE: Duration = Duration::from_millis(500);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);
const MAX_MESSAGES_PER_MINUTE: u32 = 10;
const DEDUP_SWEEP_THRESHOLD: usize = 1000;
const DEDUP_ENTRY_TTL: Duration = Duration::from_secs(120);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Routing and formatting options for one [`ChatDispatcher::send`] call.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub task_id: Option<Uuid>,
    pub list_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub category: Option<String>,
    pub parse_mode: Option<ParseMode>,
}

struct RateLimitState {
    dedup: HashMap<(String, String), Instant>,
    per_minute: HashMap<String, (u32, Instant)>,
}

/// Outbound chat dispatcher, shared across the process behind an `Arc`.
pub struct ChatDispatcher {
    pool: sqlx::PgPool,
    client: reqwest::Client,
    api_base: String,
    credentials: HashMap<BotType, String>,
    healthy: HashMap<BotType, AtomicBool>,
    rate_limits: Mutex<RateLimitState>,
}

impl ChatDispatcher {
    pub fn new(pool: sqlx::PgPool, api_base: impl Into<String>, credentials: HashMap<BotType, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client builds with a static config");

        let healthy = BotType::ALL.iter().map(|b| (*b, AtomicBool::new(true))).collect();

        Self {
            pool,
            client,
            api_base: api_base.into(),
            credentials,
            healthy,
            rate_limits: Mutex::new(RateLimitState { dedup: HashMap::new(), per_minute: HashMap::new() }),
        }
    }

    /// spec.md §4.7's five-step send pipeline. Returns `false` on any
    /// drop or transport failure; never propagates an error to the caller.
    pub async fn send(&self, bot_type: BotType, chat_id: &str, text: &str, opts: SendOptions) -> bool {
        let Some((resolved_bot, credential)) = self.resolve_credential(bot_type) else {
            tracing::warn!(?bot_type, "no credential available, even for system fallback; dropping message");
            return false;
        };

        if !self.check_rate_limit(chat_id, text).await {
            tracing::debug!(chat_id, "message dropped by rate limiter");
            return false;
        }

        let chunks = chunk_message(text);
        let n = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let body = if n > 1 {
                format!("[{}/{}] {}", i + 1, n, chunk)
            } else {
                chunk.clone()
            };

            if !self.post_message(&credential, chat_id, &body, opts.parse_mode.unwrap_or(ParseMode::Html)).await {
                return false;
            }

            if i + 1 < n {
                tokio::time::sleep(CHUNK_PAUSE).await;
            }
        }

        let category = opts.category.as_deref().unwrap_or("notification");
        if let Err(e) = chat_messages::insert_message(
            &self.pool,
            resolved_bot.env_suffix(),
            chat_id,
            category,
            text,
            opts.task_id,
            opts.list_id,
            opts.agent_id,
            None,
        )
        .await
        {
            tracing::warn!(error = %e, "failed to record chat message");
        }

        true
    }

    /// Mark `bot_type` healthy or unhealthy; consulted by [`Self::resolve_credential`]
    /// before the plain missing-credential fallback.
    pub fn set_healthy(&self, bot_type: BotType, healthy: bool) {
        if let Some(flag) = self.healthy.get(&bot_type) {
            flag.store(healthy, Ordering::SeqCst);
        }
    }

    pub fn is_healthy(&self, bot_type: BotType) -> bool {
        self.healthy.get(&bot_type).map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
    }

    fn resolve_credential(&self, bot_type: BotType) -> Option<(BotType, String)> {
        if self.is_healthy(bot_type) {
            if let Some(cred) = self.credentials.get(&bot_type) {
                return Some((bot_type, cred.clone()));
            }
        }
        if bot_type != BotType::System && self.is_healthy(BotType::System) {
            if let Some(cred) = self.credentials.get(&BotType::System) {
                return Some((BotType::System, cred.clone()));
            }
        }
        None
    }

    async fn check_rate_limit(&self, chat_id: &str, text: &str) -> bool {
        let prefix: String = text.chars().take(100).collect();
        let now = Instant::now();
        let mut state = self.rate_limits.lock().await;

        let dedup_key = (chat_id.to_string(), prefix);
        if let Some(last) = state.dedup.get(&dedup_key) {
            if now.duration_since(*last) < DEDUP_WINDOW {
                return false;
            }
        }

        let entry = state.per_minute.entry(chat_id.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= Duration::from_secs(60) {
            *entry = (0, now);
        }
        if entry.0 >= MAX_MESSAGES_PER_MINUTE {
            return false;
        }
        entry.0 += 1;

        state.dedup.insert(dedup_key, now);
        if state.dedup.len() > DEDUP_SWEEP_THRESHOLD {
            state.dedup.retain(|_, last| now.duration_since(*last) < DEDUP_ENTRY_TTL);
        }

        true
    }

    async fn post_message(&self, credential: &str, chat_id: &str, text: &str, parse_mode: ParseMode) -> bool {
        let body = SendMessageBody {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode,
            disable_web_page_preview: true,
        };

        let result = self
            .client
            .post(format!("{}/bot{credential}/sendMessage", self.api_base))
            .json(&body)
            .send()
            .await;

        match result.and_then(|r| r.error_for_status()) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "chat send failed");
                false
            }
        }
    }
}

/// The largest byte index `<= index` that lands on a UTF-8 char boundary.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut idx = index;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Split on the last newline above the 50% mark of [`MAX_CHUNK_LEN`], or at
/// the hard limit if no such newline exists. Splits only on char boundaries
/// so a multibyte character straddling the limit is never cut in half.
fn chunk_message(text: &str) -> Vec<String> {
    if text.len() <= MAX_CHUNK_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > MAX_CHUNK_LEN {
        let window_end = floor_char_boundary(rest, MAX_CHUNK_LEN);
        let half = floor_char_boundary(rest, MAX_CHUNK_LEN / 2);
        let window = &rest[half..window_end];
        let split_at = window.rfind('\n').map(|i| half + i + 1).unwrap_or(window_end);
        chunks.push(rest[..split_at].to_string());
        rest = &rest[split_at..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Background health-check loop: polls every bot's identity endpoint on
/// [`HEALTH_CHECK_INTERVAL`] and flips [`ChatDispatcher::set_healthy`].
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

pub async fn run_health_checks(dispatcher: Arc<ChatDispatcher>, credentials: HashMap<BotType, String>, cancel: tokio_util::sync::CancellationToken) {
    let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build().expect("static client config");
    let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => return,
        }
        for (bot, credential) in &credentials {
            let url = format!("{}/bot{credential}/getMe", dispatcher.api_base);
            let ok = client.get(&url).send().await.and_then(|r| r.error_for_status()).is_ok();
            dispatcher.set_healthy(*bot, ok);
            if !ok {
                tracing::warn!(?bot, "bot health check failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        let chunks = chunk_message(&"a".repeat(4000));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn overlong_message_splits_at_newline_above_half() {
        let mut text = "x".repeat(2001);
        text.push('\n');
        text.push_str(&"y".repeat(2500));
        let chunks = chunk_message(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('\n'));
    }

    #[test]
    fn chunk_without_newline_hard_splits_at_limit() {
        let text = "z".repeat(9000);
        let chunks = chunk_message(&text);
        assert!(chunks.iter().take(chunks.len() - 1).all(|c| c.len() == MAX_CHUNK_LEN));
    }

    #[test]
    fn chunk_does_not_split_a_multibyte_char_straddling_the_limit() {
        // A 3-byte char (e.g. "€") placed so it straddles MAX_CHUNK_LEN.
        let mut text = "a".repeat(MAX_CHUNK_LEN - 1);
        text.push('€');
        text.push_str(&"b".repeat(MAX_CHUNK_LEN));
        let chunks = chunk_message(&text);
        assert!(chunks.iter().all(|c| c.is_char_boundary(0) && c.is_char_boundary(c.len())));
        assert_eq!(chunks.concat(), text);
    }
}
