// Live connection registry for the chat fan-out path.
//
// Maps each open WebSocket connection to its authenticated user, its
// outbound frame sender, and the set of groups it has joined. Entirely
// ephemeral: nothing here survives a disconnect, and the durable message log
// remains the source of truth for anything a dropped connection missed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use studia_common::protocol::ws::WsMessage;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ConnectionRecord {
    user_id: Uuid,
    subscriptions: HashSet<Uuid>,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
}

/// Registry of live connections, keyed by per-connection id.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

impl ConnectionRegistry {
    /// Register an authenticated connection. Returns its connection id.
    pub async fn register(&self, user_id: Uuid) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut guard = self.connections.write().await;
        guard.insert(
            connection_id,
            ConnectionRecord { user_id, subscriptions: HashSet::new(), outbound: None },
        );
        connection_id
    }

    pub async fn register_outbound(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => {
                record.outbound = Some(sender);
                true
            }
            None => false,
        }
    }

    /// Add a group subscription. Idempotent: re-joining a group the
    /// connection already subscribes to reports `false` and must not lead to
    /// duplicate delivery (the subscription set is a set).
    pub async fn subscribe(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => record.subscriptions.insert(group_id),
            None => false,
        }
    }

    pub async fn unsubscribe(&self, connection_id: Uuid, group_id: Uuid) {
        let mut guard = self.connections.write().await;
        if let Some(record) = guard.get_mut(&connection_id) {
            record.subscriptions.remove(&group_id);
        }
    }

    /// Drop a connection and all of its subscriptions. Safe to call more
    /// than once; invoked on explicit close and on abrupt connection loss.
    pub async fn remove(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }

    pub async fn user_for(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().await.get(&connection_id).map(|record| record.user_id)
    }

    pub async fn is_subscribed(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|record| record.subscriptions.contains(&group_id))
            .unwrap_or(false)
    }

    /// Fan a frame out to every live subscriber of `group_id` except
    /// `exclude` (the originator, which already holds its local copy).
    ///
    /// Returns the delivered count. A failed send means the receiver task is
    /// gone; the miss is logged and never retried — the subscriber catches up
    /// from the durable log on its next fetch.
    pub async fn broadcast_to_group(
        &self,
        group_id: Uuid,
        message: WsMessage,
        exclude: Option<Uuid>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.connections.read().await;
            for (connection_id, record) in guard.iter() {
                if Some(*connection_id) == exclude {
                    continue;
                }
                if record.subscriptions.contains(&group_id) {
                    if let Some(sender) = record.outbound.clone() {
                        recipients.push((*connection_id, sender));
                    }
                }
            }
        }

        let mut delivered = 0;
        for (connection_id, recipient) in recipients {
            if recipient.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(%connection_id, %group_id, "broadcast delivery miss");
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(group_id: Uuid) -> WsMessage {
        WsMessage::UserJoined { group_id, user_id: Uuid::new_v4(), joined_at: chrono::Utc::now() }
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_per_connection() {
        let registry = ConnectionRegistry::default();
        let connection = registry.register(Uuid::new_v4()).await;
        let group = Uuid::new_v4();

        assert!(registry.subscribe(connection, group).await);
        assert!(!registry.subscribe(connection, group).await);

        let (sender, mut receiver) = mpsc::unbounded_channel();
        assert!(registry.register_outbound(connection, sender).await);

        let delivered = registry.broadcast_to_group(group, frame(group), None).await;
        assert_eq!(delivered, 1);
        assert!(receiver.recv().await.is_some());
        assert!(receiver.try_recv().is_err(), "double join must not duplicate delivery");
    }

    #[tokio::test]
    async fn broadcast_excludes_the_originating_connection() {
        let registry = ConnectionRegistry::default();
        let group = Uuid::new_v4();

        let sender_conn = registry.register(Uuid::new_v4()).await;
        let receiver_conn = registry.register(Uuid::new_v4()).await;
        registry.subscribe(sender_conn, group).await;
        registry.subscribe(receiver_conn, group).await;

        let (sender_tx, mut sender_rx) = mpsc::unbounded_channel();
        let (receiver_tx, mut receiver_rx) = mpsc::unbounded_channel();
        registry.register_outbound(sender_conn, sender_tx).await;
        registry.register_outbound(receiver_conn, receiver_tx).await;

        let delivered =
            registry.broadcast_to_group(group, frame(group), Some(sender_conn)).await;
        assert_eq!(delivered, 1);
        assert!(receiver_rx.recv().await.is_some());
        assert!(sender_rx.try_recv().is_err(), "originator must not re-receive its own frame");
    }

    #[tokio::test]
    async fn broadcast_skips_other_groups() {
        let registry = ConnectionRegistry::default();
        let joined = Uuid::new_v4();
        let other = Uuid::new_v4();

        let connection = registry.register(Uuid::new_v4()).await;
        registry.subscribe(connection, joined).await;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        registry.register_outbound(connection, sender).await;

        assert_eq!(registry.broadcast_to_group(other, frame(other), None).await, 0);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_stops_delivery() {
        let registry = ConnectionRegistry::default();
        let group = Uuid::new_v4();
        let connection = registry.register(Uuid::new_v4()).await;
        registry.subscribe(connection, group).await;
        let (sender, _receiver) = mpsc::unbounded_channel();
        registry.register_outbound(connection, sender).await;

        registry.remove(connection).await;
        registry.remove(connection).await;

        assert_eq!(registry.broadcast_to_group(group, frame(group), None).await, 0);
        assert!(registry.user_for(connection).await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_delivery_miss() {
        let registry = ConnectionRegistry::default();
        let group = Uuid::new_v4();

        let alive = registry.register(Uuid::new_v4()).await;
        let gone = registry.register(Uuid::new_v4()).await;
        registry.subscribe(alive, group).await;
        registry.subscribe(gone, group).await;

        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        registry.register_outbound(alive, alive_tx).await;
        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        registry.register_outbound(gone, gone_tx).await;
        drop(gone_rx);

        let delivered = registry.broadcast_to_group(group, frame(group), None).await;
        assert_eq!(delivered, 1, "only the live receiver counts");
        assert!(alive_rx.recv().await.is_some());
    }
}
