// Chat synchronization: one deduplicated, time-ordered log per group across
// two delivery paths.
//
// Messages reach clients via the durable log (fetched on load) and via the
// live broadcast channel; the same message may arrive on both. `MessageLog`
// reconciles them: merge by unique id, order by creation timestamp, ties by
// arrival. `Publisher` owns the write path: durable append first, broadcast
// to the group's other subscribers only after the append succeeds.

pub mod store;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use studia_common::protocol::ws::WsMessage;
use studia_common::types::ChatMessage;
use tracing::debug;
use uuid::Uuid;

use crate::ws::registry::ConnectionRegistry;
use store::{AppendOutcome, MessageStore};

/// A locally-held view of one group's message stream.
///
/// Merging is idempotent (a message id is only ever admitted once) and
/// order-independent: whatever order fetch results and broadcast events
/// arrive in, the final sorted view is the same. The sort is stable, so
/// messages sharing a timestamp keep their arrival order.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
    seen: HashSet<Uuid>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one incoming message. Returns `false` (and changes nothing) if
    /// an entry with the same id is already present.
    pub fn merge(&mut self, incoming: ChatMessage) -> bool {
        if !self.seen.insert(incoming.id) {
            return false;
        }

        self.entries.push(incoming);
        self.entries.sort_by_key(|message| message.sent_at);
        true
    }

    /// Merge a whole batch (e.g. a full-log fetch) in arrival order.
    pub fn merge_all(&mut self, incoming: impl IntoIterator<Item = ChatMessage>) -> usize {
        incoming.into_iter().filter(|message| self.merge(message.clone())).count()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.seen.contains(&id)
    }
}

/// Outcome of a publish: either freshly delivered or an idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { message: ChatMessage, recipients: usize },
    Duplicate { message: ChatMessage },
}

impl PublishOutcome {
    pub fn message(&self) -> &ChatMessage {
        match self {
            Self::Delivered { message, .. } | Self::Duplicate { message } => message,
        }
    }
}

/// The single write path for chat messages: append, then fan out.
#[derive(Clone)]
pub struct Publisher {
    store: MessageStore,
    registry: Arc<ConnectionRegistry>,
}

impl Publisher {
    pub fn new(store: MessageStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Durably append `message`, then broadcast it to the group's live
    /// subscribers, excluding `origin` (the sender's own connection, which
    /// already holds an optimistic copy).
    ///
    /// If the append fails no broadcast happens and the error propagates to
    /// the caller, which must report the send as failed. A replayed id skips
    /// the broadcast: subscribers received the message when it was first
    /// persisted.
    pub async fn publish(
        &self,
        message: ChatMessage,
        origin: Option<Uuid>,
    ) -> Result<PublishOutcome> {
        let group_id = message.group_id;

        match self.store.append(message).await? {
            AppendOutcome::Appended(stored) => {
                let recipients = self
                    .registry
                    .broadcast_to_group(
                        group_id,
                        WsMessage::ReceiveMessage { message: stored.clone() },
                        origin,
                    )
                    .await;
                debug!(%group_id, message_id = %stored.id, recipients, "chat message published");
                Ok(PublishOutcome::Delivered { message: stored, recipients })
            }
            AppendOutcome::Duplicate(stored) => {
                debug!(%group_id, message_id = %stored.id, "chat publish replayed, skipping broadcast");
                Ok(PublishOutcome::Duplicate { message: stored })
            }
        }
    }
}
