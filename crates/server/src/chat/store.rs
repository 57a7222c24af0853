// Durable chat message store.
//
// The message id is the dedup key across delivery paths: appends are
// idempotent, so a client retrying a send with the same id cannot duplicate
// an already-persisted message.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use studia_common::types::{ChatMessage, MessagePayload};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of a durable append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was newly persisted and should be broadcast.
    Appended(ChatMessage),
    /// A message with this id already exists; the stored row wins and no
    /// broadcast is owed (subscribers saw it the first time).
    Duplicate(ChatMessage),
}

impl AppendOutcome {
    pub fn message(&self) -> &ChatMessage {
        match self {
            Self::Appended(message) | Self::Duplicate(message) => message,
        }
    }
}

#[derive(Clone)]
pub enum MessageStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryMessageStore>>),
}

#[derive(Default)]
pub struct MemoryMessageStore {
    by_group: HashMap<Uuid, Vec<ChatMessage>>,
    ids: HashSet<Uuid>,
    fail_appends: bool,
}

impl MessageStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryMessageStore::default())))
    }

    /// Make subsequent memory appends fail, to exercise the
    /// no-broadcast-on-persistence-failure path.
    pub async fn set_append_failure(&self, fail: bool) {
        if let Self::Memory(store) = self {
            store.write().await.fail_appends = fail;
        }
    }

    pub async fn append(&self, message: ChatMessage) -> Result<AppendOutcome> {
        match self {
            Self::Postgres(pool) => append_pg(pool, message).await,
            Self::Memory(store) => append_mem(store, message).await,
        }
    }

    /// The group's full log, ascending by creation timestamp (ties by id for
    /// a stable order across fetches).
    pub async fn list_for_group(&self, group_id: Uuid) -> Result<Vec<ChatMessage>> {
        match self {
            Self::Postgres(pool) => list_for_group_pg(pool, group_id).await,
            Self::Memory(store) => list_for_group_mem(store, group_id).await,
        }
    }
}

// ── Postgres store ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    group_id: Uuid,
    sender_id: Uuid,
    sent_at: DateTime<Utc>,
    kind: String,
    body: Option<String>,
    file_url: Option<String>,
    file_name: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> Result<ChatMessage> {
        let payload = match self.kind.as_str() {
            "text" => MessagePayload::Text {
                body: self.body.context("text message row is missing body")?,
            },
            "file" => MessagePayload::File {
                url: self.file_url.context("file message row is missing file_url")?,
                name: self.file_name.context("file message row is missing file_name")?,
            },
            other => anyhow::bail!("invalid chat message kind '{other}' in database"),
        };

        Ok(ChatMessage {
            id: self.id,
            group_id: self.group_id,
            sender_id: self.sender_id,
            sent_at: self.sent_at,
            payload,
        })
    }
}

async fn append_pg(pool: &PgPool, message: ChatMessage) -> Result<AppendOutcome> {
    let (kind, body, file_url, file_name) = match &message.payload {
        MessagePayload::Text { body } => ("text", Some(body.as_str()), None, None),
        MessagePayload::File { url, name } => {
            ("file", None, Some(url.as_str()), Some(name.as_str()))
        }
    };

    let inserted = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO chat_messages (id, group_id, sender_id, sent_at, kind, body, file_url, file_name)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        RETURNING id, group_id, sender_id, sent_at, kind, body, file_url, file_name
        "#,
    )
    .bind(message.id)
    .bind(message.group_id)
    .bind(message.sender_id)
    .bind(message.sent_at)
    .bind(kind)
    .bind(body)
    .bind(file_url)
    .bind(file_name)
    .fetch_optional(pool)
    .await
    .context("failed to append chat message")?;

    if let Some(row) = inserted {
        return Ok(AppendOutcome::Appended(row.into_message()?));
    }

    let existing = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, group_id, sender_id, sent_at, kind, body, file_url, file_name
        FROM chat_messages
        WHERE id = $1
        "#,
    )
    .bind(message.id)
    .fetch_one(pool)
    .await
    .context("failed to load already-persisted chat message")?;

    Ok(AppendOutcome::Duplicate(existing.into_message()?))
}

async fn list_for_group_pg(pool: &PgPool, group_id: Uuid) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, group_id, sender_id, sent_at, kind, body, file_url, file_name
        FROM chat_messages
        WHERE group_id = $1
        ORDER BY sent_at ASC, id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
    .context("failed to list chat messages")?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

// ── In-memory store ──────────────────────────────────────────────────────────

async fn append_mem(
    store: &RwLock<MemoryMessageStore>,
    message: ChatMessage,
) -> Result<AppendOutcome> {
    let mut store = store.write().await;
    if store.fail_appends {
        anyhow::bail!("memory message store is configured to fail appends");
    }

    if !store.ids.insert(message.id) {
        let existing = store
            .by_group
            .values()
            .flatten()
            .find(|candidate| candidate.id == message.id)
            .cloned()
            .context("message id indexed but row missing")?;
        return Ok(AppendOutcome::Duplicate(existing));
    }

    store.by_group.entry(message.group_id).or_default().push(message.clone());
    Ok(AppendOutcome::Appended(message))
}

async fn list_for_group_mem(
    store: &RwLock<MemoryMessageStore>,
    group_id: Uuid,
) -> Result<Vec<ChatMessage>> {
    let store = store.read().await;
    let mut messages = store.by_group.get(&group_id).cloned().unwrap_or_default();
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
    Ok(messages)
}
