//! Wire types and the reception-mode abstraction for chat transports.
//!
//! Exactly one of [`WebhookTransport`] / [`PollingTransport`] is active per
//! process, selected by configuration; both feed parsed [`InboundUpdate`]s
//! into the same [`crate::command::CommandRouter`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bot_type::BotType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParseMode {
    Html,
    Markdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageBody {
    pub chat_id: String,
    pub text: String,
    pub parse_mode: ParseMode,
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetWebhookBody {
    pub url: String,
    pub secret_token: String,
    pub allowed_updates: Vec<String>,
    pub drop_pending_updates: bool,
}

impl SetWebhookBody {
    pub fn new(url: impl Into<String>, secret_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret_token: secret_token.into(),
            allowed_updates: vec!["message".to_string(), "callback_query".to_string()],
            drop_pending_updates: false,
        }
    }
}

/// An inbound update, in either of the two shapes spec.md §6 names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundUpdate {
    Message { message: MessagePayload },
    CallbackQuery { callback_query: CallbackQueryPayload },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub chat: ChatRef,
    pub text: String,
    pub from: UserRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQueryPayload {
    pub data: String,
    pub message: MessageRef,
    pub from: UserRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub chat: ChatRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: String,
}

impl InboundUpdate {
    pub fn chat_id(&self) -> &str {
        match self {
            InboundUpdate::Message { message } => &message.chat.id,
            InboundUpdate::CallbackQuery { callback_query } => &callback_query.message.chat.id,
        }
    }

    pub fn from_id(&self) -> &str {
        match self {
            InboundUpdate::Message { message } => &message.from.id,
            InboundUpdate::CallbackQuery { callback_query } => &callback_query.from.id,
        }
    }
}

/// A reception mode that feeds parsed updates to `sink`.
#[async_trait::async_trait]
pub trait BotTransport: Send + Sync {
    async fn run(&self, sink: mpsc::Sender<InboundUpdate>, cancel: tokio_util::sync::CancellationToken) -> Result<()>;
}

/// Mounted onto the `fleetwatch-cli` axum router; validates the
/// `X-Telegram-Bot-Api-Secret-Token` header against the configured secret
/// and forwards the parsed body.
pub struct WebhookTransport {
    pub secret: String,
}

/// One `tokio::spawn`ed long-poll loop per bot, calling `getUpdates`.
pub struct PollingTransport {
    pub client: Arc<reqwest::Client>,
    pub bot_type: BotType,
    pub base_url: String,
    pub credential: String,
    pub poll_interval: Duration,
}

#[async_trait::async_trait]
impl BotTransport for PollingTransport {
    async fn run(&self, sink: mpsc::Sender<InboundUpdate>, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut offset: i64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let url = format!("{}/bot{}/getUpdates?offset={offset}&timeout=30", self.base_url, self.credential);
            let response = tokio::select! {
                r = self.client.get(&url).send() => r,
                _ = cancel.cancelled() => return Ok(()),
            };
            match response.and_then(|r| r.error_for_status()) {
                Ok(resp) => {
                    let batch: PollResponse = match resp.json().await {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::warn!(bot = ?self.bot_type, error = %e, "failed to parse getUpdates response");
                            continue;
                        }
                    };
                    for item in batch.result {
                        offset = offset.max(item.update_id + 1);
                        if sink.send(item.update).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(bot = ?self.bot_type, error = %e, "getUpdates poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    result: Vec<PollItem>,
}

#[derive(Debug, Deserialize)]
struct PollItem {
    update_id: i64,
    #[serde(flatten)]
    update: InboundUpdate,
}

impl WebhookTransport {
    /// Validate the shared secret header the webhook receiver forwards.
    pub fn validate_secret(&self, provided: Option<&str>) -> bool {
        provided.map(|p| p == self.secret).unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl BotTransport for WebhookTransport {
    /// Webhook reception is driven by the axum route handler in
    /// `fleetwatch-cli`, not by a background loop; `run` just waits for
    /// cancellation so callers can treat both transports uniformly.
    async fn run(&self, _sink: mpsc::Sender<InboundUpdate>, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// Build the `setWebhook` request body for a given public URL.
pub fn set_webhook_request(url: &str, secret: &str) -> SetWebhookBody {
    SetWebhookBody::new(url, secret)
}

pub async fn post_set_webhook(client: &reqwest::Client, api_base: &str, credential: &str, body: &SetWebhookBody) -> Result<()> {
    client
        .post(format!("{api_base}/bot{credential}/setWebhook"))
        .json(body)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .context("setWebhook request failed")?
        .error_for_status()
        .context("setWebhook returned an error status")?;
    Ok(())
}
