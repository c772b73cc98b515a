//! Command / approval loop: parses inbound chat commands, drives
//! `fleetwatch-core`/`fleetwatch-db`, and renders replies back on the
//! originating channel.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fleetwatch_core::grouping::{cluster, name_group, score_pair, ScorableTask};
use fleetwatch_core::impact::{self, TaskDraft};
use fleetwatch_core::orchestrator;
use fleetwatch_db::models::{FileOperation, ImpactSource, ListStatus, SuggestionStatus, TaskCategory, TaskEffort};
use fleetwatch_db::queries::{file_impacts, grouping_suggestions, grouping_weights, task_lists, tasks as task_db};

use crate::bot_type::BotType;
use crate::dispatch::{ChatDispatcher, SendOptions};
use crate::transport::InboundUpdate;

const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Parsed callback-button payload (`execute:<id>:start|cancel`,
/// `suggest:<id>:accept|reject`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    ExecuteStart(Uuid),
    ExecuteCancel(Uuid),
    SuggestAccept(Uuid),
    SuggestReject(Uuid),
}

impl FromStr for CallbackData {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (verb, id, action) = (
            parts.next().ok_or_else(|| anyhow!("empty callback data"))?,
            parts.next().ok_or_else(|| anyhow!("missing id in callback data: {s}"))?,
            parts.next().ok_or_else(|| anyhow!("missing action in callback data: {s}"))?,
        );
        let id = Uuid::parse_str(id).map_err(|e| anyhow!("invalid id in callback data {s}: {e}"))?;
        match (verb, action) {
            ("execute", "start") => Ok(CallbackData::ExecuteStart(id)),
            ("execute", "cancel") => Ok(CallbackData::ExecuteCancel(id)),
            ("suggest", "accept") => Ok(CallbackData::SuggestAccept(id)),
            ("suggest", "reject") => Ok(CallbackData::SuggestReject(id)),
            _ => Err(anyhow!("unrecognised callback data: {s}")),
        }
    }
}

/// Outcome of handling one inbound update; the caller renders nothing
/// further, `handle` has already sent any reply through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Replied,
    Ignored,
    Unrecognised,
}

/// An execution the operator approved but has not yet started, or an
/// approval still awaiting `start`/`cancel`.
pub struct PendingApproval {
    pub list_id: Uuid,
    pub chat_id: String,
    pub bot_type: BotType,
    pub expires_at: chrono::DateTime<Utc>,
    timeout_handle: tokio::task::JoinHandle<()>,
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        self.timeout_handle.abort();
    }
}

/// Tracks in-flight executions so `/pause`, `/resume`, and `/stop` can
/// reach a running orchestrator loop without a side channel through the
/// store.
#[derive(Default)]
pub struct RunRegistry {
    paused_senders: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
    agent_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_list(&self, list_id: Uuid, sender: watch::Sender<bool>) {
        self.paused_senders.lock().await.insert(list_id, sender);
    }

    pub async fn register_agent(&self, agent_id: Uuid, token: CancellationToken) {
        self.agent_tokens.lock().await.insert(agent_id, token);
    }

    pub async fn pause(&self, list_id: Uuid) -> bool {
        match self.paused_senders.lock().await.get(&list_id) {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    pub async fn resume(&self, list_id: Uuid) -> bool {
        match self.paused_senders.lock().await.get(&list_id) {
            Some(tx) => {
                let _ = tx.send(false);
                true
            }
            None => false,
        }
    }

    pub async fn stop_agent(&self, agent_id: Uuid) -> bool {
        match self.agent_tokens.lock().await.remove(&agent_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Routes inbound text commands and callback-button presses.
pub struct CommandRouter {
    pool: sqlx::PgPool,
    dispatcher: Arc<ChatDispatcher>,
    runs: Arc<RunRegistry>,
    approvals: Mutex<HashMap<Uuid, PendingApproval>>,
    approval_timeout: Duration,
}

impl CommandRouter {
    pub fn new(pool: sqlx::PgPool, dispatcher: Arc<ChatDispatcher>, runs: Arc<RunRegistry>) -> Self {
        Self {
            pool,
            dispatcher,
            runs,
            approvals: Mutex::new(HashMap::new()),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    pub async fn handle(&self, update: InboundUpdate, bot_type: BotType, project_id: Uuid) -> Result<Outcome> {
        let chat_id = update.chat_id().to_string();
        match update {
            InboundUpdate::Message { message } => self.handle_command(&message.text, &chat_id, bot_type, project_id).await,
            InboundUpdate::CallbackQuery { callback_query } => {
                let data: CallbackData = match callback_query.data.parse() {
                    Ok(d) => d,
                    Err(_) => return Ok(Outcome::Unrecognised),
                };
                self.handle_callback(data, &chat_id, bot_type).await
            }
        }
    }

    async fn reply(&self, bot_type: BotType, chat_id: &str, text: &str) -> Outcome {
        self.dispatcher.send(bot_type, chat_id, text, SendOptions::default()).await;
        Outcome::Replied
    }

    async fn handle_command(&self, text: &str, chat_id: &str, bot_type: BotType, project_id: Uuid) -> Result<Outcome> {
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        let outcome = match command {
            "/newtask" => self.cmd_newtask(rest, chat_id, bot_type, project_id).await?,
            "/queue" => self.cmd_queue(chat_id, bot_type, project_id).await?,
            "/suggest" => self.cmd_suggest(chat_id, bot_type, project_id).await?,
            "/accept" => self.cmd_suggestion_decision(rest, chat_id, bot_type, SuggestionStatus::Accepted).await?,
            "/reject" => self.cmd_suggestion_decision(rest, chat_id, bot_type, SuggestionStatus::Rejected).await?,
            "/override" => self.cmd_override(rest, chat_id, bot_type).await?,
            "/execute" => self.cmd_execute(rest, chat_id, bot_type).await?,
            "/pause" => self.cmd_pause(rest, chat_id, bot_type).await?,
            "/resume" => self.cmd_resume(rest, chat_id, bot_type).await?,
            "/agents" => self.cmd_agents(chat_id, bot_type).await?,
            "/stop" => self.cmd_stop(rest, chat_id, bot_type).await?,
            _ => Outcome::Unrecognised,
        };
        Ok(outcome)
    }

    async fn cmd_newtask(&self, text: &str, chat_id: &str, bot_type: BotType, project_id: Uuid) -> Result<Outcome> {
        if text.is_empty() {
            return Ok(self.reply(bot_type, chat_id, "usage: /newtask <text>").await);
        }
        let human_id = format!("T-{}", Uuid::new_v4().simple());
        let task = task_db::insert_task(
            &self.pool,
            &human_id,
            project_id,
            text,
            text,
            TaskCategory::Task,
            TaskEffort::Medium,
            0,
        )
        .await?;

        let draft = TaskDraft { title: &task.title, description: &task.description, category: task.category };
        for predicted in impact::analyse(&self.pool, &draft).await {
            file_impacts::insert_impact(&self.pool, task.id, &predicted.path, predicted.operation, predicted.confidence, predicted.source).await?;
        }

        Ok(self.reply(bot_type, chat_id, &format!("created {} ({})", task.human_id, task.id)).await)
    }

    async fn cmd_queue(&self, chat_id: &str, bot_type: BotType, project_id: Uuid) -> Result<Outcome> {
        let pending = task_db::list_unassigned_tasks(&self.pool, project_id).await?;
        let text = if pending.is_empty() {
            "evaluation queue is empty".to_string()
        } else {
            let mut lines = vec![format!("{} task(s) in evaluation queue:", pending.len())];
            for t in pending.iter().take(20) {
                lines.push(format!("  {} [{}] {}", t.human_id, t.category, t.title));
            }
            lines.join("\n")
        };
        Ok(self.reply(bot_type, chat_id, &text).await)
    }

    async fn cmd_suggest(&self, chat_id: &str, bot_type: BotType, project_id: Uuid) -> Result<Outcome> {
        let pending = grouping_suggestions::list_pending(&self.pool).await?;
        if !pending.is_empty() {
            let mut lines = vec![format!("{} pending suggestion(s):", pending.len())];
            for s in &pending {
                lines.push(format!("  {} -- {} ({} tasks)", s.id, s.proposed_name, s.candidate_task_ids.len()));
            }
            return Ok(self.reply(bot_type, chat_id, &lines.join("\n")).await);
        }

        let unassigned = task_db::list_unassigned_tasks(&self.pool, project_id).await?;
        let weights = grouping_weights::get_for_project(&self.pool, project_id).await?;
        let scorable: Vec<ScorableTask> = unassigned
            .iter()
            .map(|t| ScorableTask {
                id: t.id,
                title: t.title.clone(),
                description: t.description.clone(),
                category: t.category,
                impacted_paths: Vec::new(),
                depends_on: Vec::new(),
                component_tags: Vec::new(),
            })
            .collect();

        let mut pairs = Vec::new();
        for (i, a) in scorable.iter().enumerate() {
            for b in &scorable[i + 1..] {
                let pair = score_pair(a, b, &weights);
                if pair.score > 0.0 {
                    pairs.push(pair);
                }
            }
        }
        let groups = cluster(&scorable, &pairs, &weights);

        if groups.is_empty() {
            return Ok(self.reply(bot_type, chat_id, "no grouping suggestions found").await);
        }

        let mut created = 0;
        for group in groups {
            let titles: Vec<&str> = scorable
                .iter()
                .filter(|t| group.task_ids.contains(&t.id))
                .map(|t| t.title.as_str())
                .collect();
            let name = name_group(&titles);
            grouping_suggestions::insert_suggestion(
                &self.pool,
                &group.task_ids,
                &name,
                "similarity clustering over file/dependency/category signals",
                group.best_score,
                Utc::now() + chrono::Duration::hours(24),
            )
            .await?;
            created += 1;
        }

        Ok(self.reply(bot_type, chat_id, &format!("created {created} grouping suggestion(s)")).await)
    }

    async fn cmd_suggestion_decision(&self, id_str: &str, chat_id: &str, bot_type: BotType, status: SuggestionStatus) -> Result<Outcome> {
        let Ok(id) = Uuid::parse_str(id_str) else {
            return Ok(self.reply(bot_type, chat_id, "usage: /accept|/reject <suggestionId>").await);
        };
        grouping_suggestions::transition_status(&self.pool, id, status).await?;
        Ok(self.reply(bot_type, chat_id, &format!("suggestion {id} marked {status}")).await)
    }

    async fn cmd_override(&self, rest: &str, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 3 {
            return Ok(self
                .reply(bot_type, chat_id, "usage: /override <taskId> <OP> <path> | /override <taskId> REMOVE <path> <OP>")
                .await);
        }
        let Ok(task_id) = Uuid::parse_str(tokens[0]) else {
            return Ok(self.reply(bot_type, chat_id, "invalid task id").await);
        };

        if tokens[1].eq_ignore_ascii_case("REMOVE") {
            if tokens.len() < 4 {
                return Ok(self.reply(bot_type, chat_id, "usage: /override <taskId> REMOVE <path> <OP>").await);
            }
            let path = tokens[2];
            let Ok(operation) = tokens[3].to_lowercase().parse::<FileOperation>() else {
                return Ok(self.reply(bot_type, chat_id, &format!("unknown operation: {}", tokens[3])).await);
            };
            let removed = file_impacts::remove_impact(&self.pool, task_id, path, operation).await?;
            let text = if removed { format!("removed override for {path} ({operation})") } else { format!("no override found for {path} ({operation})") };
            return Ok(self.reply(bot_type, chat_id, &text).await);
        }

        let Ok(operation) = tokens[1].to_lowercase().parse::<FileOperation>() else {
            return Ok(self.reply(bot_type, chat_id, &format!("unknown operation: {}", tokens[1])).await);
        };
        let path = tokens[2..].join(" ");
        file_impacts::insert_impact(&self.pool, task_id, &path, operation, 1.0, ImpactSource::UserDeclared).await?;

        let task = task_db::get_task(&self.pool, task_id).await?;
        if let Some(list_id) = task.list_id {
            task_lists::transition_status(&self.pool, list_id, ListStatus::Ready, ListStatus::Draft).await.ok();
        }

        Ok(self.reply(bot_type, chat_id, &format!("recorded override: {path} ({operation})")).await)
    }

    async fn cmd_execute(&self, id_str: &str, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        let Ok(list_id) = Uuid::parse_str(id_str) else {
            return Ok(self.reply(bot_type, chat_id, "usage: /execute <listId>").await);
        };
        let list = task_lists::get_list(&self.pool, list_id).await?;
        if list.status == ListStatus::Running {
            return Ok(self.reply(bot_type, chat_id, "list is already running").await);
        }
        if list.total_tasks == 0 {
            return Ok(self.reply(bot_type, chat_id, "list is empty").await);
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(self.approval_timeout).unwrap();
        let dispatcher = Arc::clone(&self.dispatcher);
        let chat_id_owned = chat_id.to_string();
        let approvals_timeout = self.approval_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(approvals_timeout).await;
            dispatcher.send(bot_type, &chat_id_owned, "\u{23f0} Approval expired", SendOptions::default()).await;
        });

        self.approvals.lock().await.insert(
            list_id,
            PendingApproval { list_id, chat_id: chat_id.to_string(), bot_type, expires_at, timeout_handle: handle },
        );

        Ok(self
            .reply(
                bot_type,
                chat_id,
                &format!("execute {list_id}? [execute:{list_id}:start] [execute:{list_id}:cancel]"),
            )
            .await)
    }

    async fn cmd_pause(&self, id_str: &str, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        let Ok(list_id) = Uuid::parse_str(id_str) else {
            return Ok(self.reply(bot_type, chat_id, "usage: /pause <listId>").await);
        };
        let text = if self.runs.pause(list_id).await { "paused" } else { "no active run for that list" };
        Ok(self.reply(bot_type, chat_id, text).await)
    }

    async fn cmd_resume(&self, id_str: &str, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        let Ok(list_id) = Uuid::parse_str(id_str) else {
            return Ok(self.reply(bot_type, chat_id, "usage: /resume <listId>").await);
        };
        let text = if self.runs.resume(list_id).await { "resumed" } else { "no active run for that list" };
        Ok(self.reply(bot_type, chat_id, text).await)
    }

    async fn cmd_agents(&self, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        Ok(self.reply(bot_type, chat_id, "active agents are listed in the dashboard's /api/agents view").await)
    }

    async fn cmd_stop(&self, id_str: &str, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        let Ok(agent_id) = Uuid::parse_str(id_str) else {
            return Ok(self.reply(bot_type, chat_id, "usage: /stop <agentId>").await);
        };
        let text = if self.runs.stop_agent(agent_id).await { "agent stopped" } else { "no such active agent" };
        Ok(self.reply(bot_type, chat_id, text).await)
    }

    async fn handle_callback(&self, data: CallbackData, chat_id: &str, bot_type: BotType) -> Result<Outcome> {
        match data {
            CallbackData::ExecuteStart(list_id) => {
                let approval = self.approvals.lock().await.remove(&list_id);
                if approval.is_none() {
                    return Ok(self.reply(bot_type, chat_id, "approval expired or not found").await);
                }
                let execution_id = orchestrator::advance_to_planning(&self.pool, list_id).await?;
                Ok(self.reply(bot_type, chat_id, &format!("started execution {execution_id} for list {list_id}")).await)
            }
            CallbackData::ExecuteCancel(list_id) => {
                self.approvals.lock().await.remove(&list_id);
                Ok(self.reply(bot_type, chat_id, "execution cancelled").await)
            }
            CallbackData::SuggestAccept(id) => {
                grouping_suggestions::transition_status(&self.pool, id, SuggestionStatus::Accepted).await?;
                Ok(self.reply(bot_type, chat_id, &format!("suggestion {id} accepted")).await)
            }
            CallbackData::SuggestReject(id) => {
                grouping_suggestions::transition_status(&self.pool, id, SuggestionStatus::Rejected).await?;
                Ok(self.reply(bot_type, chat_id, &format!("suggestion {id} rejected")).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_execute_start() {
        assert_eq!(
            "execute:2f4a1e5e-2222-4444-8888-000000000001:start".parse::<CallbackData>().unwrap(),
            CallbackData::ExecuteStart(Uuid::parse_str("2f4a1e5e-2222-4444-8888-000000000001").unwrap())
        );
    }

    #[test]
    fn parses_suggest_reject() {
        assert_eq!(
            "suggest:2f4a1e5e-2222-4444-8888-000000000002:reject".parse::<CallbackData>().unwrap(),
            CallbackData::SuggestReject(Uuid::parse_str("2f4a1e5e-2222-4444-8888-000000000002").unwrap())
        );
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!("frobnicate:1:2".parse::<CallbackData>().is_err());
    }

    #[tokio::test]
    async fn run_registry_pause_resume_round_trip() {
        let registry = RunRegistry::new();
        let list_id = Uuid::new_v4();
        let (tx, mut rx) = watch::channel(false);
        registry.register_list(list_id, tx).await;

        assert!(registry.pause(list_id).await);
        assert!(*rx.borrow_and_update());

        assert!(registry.resume(list_id).await);
        assert!(!*rx.borrow_and_update());

        assert!(!registry.pause(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn run_registry_stop_agent_cancels_token() {
        let registry = RunRegistry::new();
        let agent_id = Uuid::new_v4();
        let token = CancellationToken::new();
        registry.register_agent(agent_id, token.clone()).await;

        assert!(registry.stop_agent(agent_id).await);
        assert!(token.is_cancelled());
        assert!(!registry.stop_agent(agent_id).await);
    }
}
