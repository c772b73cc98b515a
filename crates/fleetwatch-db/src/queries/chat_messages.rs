//! Database query functions for the `chat_messages` table.
//!
//! This is an append-only audit log of outbound messages; the dispatcher
//! itself owns rate limiting and dedup in memory, so reads here are for
//! dashboard/history purposes rather than the hot send path.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::ChatMessage;

#[allow(clippy::too_many_arguments)]
pub async fn insert_message(
    pool: &PgPool,
    bot_type: &str,
    chat_id: &str,
    category: &str,
    text: &str,
    task_id: Option<Uuid>,
    list_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    upstream_message_id: Option<&str>,
) -> StoreResult<ChatMessage> {
    sqlx::query_as::<_, ChatMessage>(
        "INSERT INTO chat_messages \
            (bot_type, chat_id, category, text, task_id, list_id, agent_id, upstream_message_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(bot_type)
    .bind(chat_id)
    .bind(category)
    .bind(text)
    .bind(task_id)
    .bind(list_id)
    .bind(agent_id)
    .bind(upstream_message_id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn recent_for_list(pool: &PgPool, list_id: Uuid, n: i64) -> StoreResult<Vec<ChatMessage>> {
    sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages WHERE list_id = $1 ORDER BY sent_at DESC LIMIT $2",
    )
    .bind(list_id)
    .bind(n)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}
