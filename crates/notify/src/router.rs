//! Topic router: explicit subscribe/unsubscribe, per-socket mpsc senders.
//!
//! Delivery is at-least-once within a session; a dropped receiver just
//! unsubscribes that socket. One slow socket never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::topics::Topic;

/// Process-unique socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

impl SocketId {
    pub fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One server→client message: an event name plus a JSON payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl OutboundFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Default)]
pub struct TopicRouter {
    subs: RwLock<HashMap<Topic, HashMap<SocketId, mpsc::UnboundedSender<OutboundFrame>>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket on a topic. The caller keeps the receiver.
    pub async fn subscribe(
        &self,
        topic: Topic,
        socket: SocketId,
        sender: mpsc::UnboundedSender<OutboundFrame>,
    ) {
        debug!(topic = %topic, socket = ?socket, "subscribe");
        self.subs
            .write()
            .await
            .entry(topic)
            .or_default()
            .insert(socket, sender);
    }

    pub async fn unsubscribe(&self, topic: &Topic, socket: SocketId) {
        let mut subs = self.subs.write().await;
        if let Some(members) = subs.get_mut(topic) {
            members.remove(&socket);
            if members.is_empty() {
                subs.remove(topic);
            }
        }
    }

    /// Remove a socket from every topic (connection closed).
    pub async fn disconnect(&self, socket: SocketId) {
        let mut subs = self.subs.write().await;
        subs.retain(|_, members| {
            members.remove(&socket);
            !members.is_empty()
        });
    }

    /// Deliver a frame to every subscriber of the topic. Returns the
    /// number of sockets reached; closed sockets are pruned.
    pub async fn publish(&self, topic: &Topic, frame: OutboundFrame) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<SocketId> = Vec::new();

        {
            let subs = self.subs.read().await;
            let Some(members) = subs.get(topic) else {
                return 0;
            };
            for (&socket, sender) in members {
                if sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(socket);
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subs.write().await;
            if let Some(members) = subs.get_mut(topic) {
                for socket in dead {
                    members.remove(&socket);
                }
                if members.is_empty() {
                    subs.remove(topic);
                }
            }
        }

        delivered
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subs
            .read()
            .await
            .get(topic)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_subscribers() {
        let router = TopicRouter::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = SocketId::next();
        let b = SocketId::next();

        router.subscribe(Topic::Leaderboard, a, tx_a).await;
        router
            .subscribe(Topic::User("u1".to_string()), b, tx_b)
            .await;

        let frame = OutboundFrame::new("leaderboard:updated", serde_json::json!({}));
        let delivered = router.publish(&Topic::Leaderboard, frame.clone()).await;

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await, Some(frame));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let router = TopicRouter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = SocketId::next();
        router.subscribe(Topic::ActivityFeed, socket, tx).await;
        drop(rx);

        let delivered = router
            .publish(
                &Topic::ActivityFeed,
                OutboundFrame::new("activity:new", serde_json::json!({})),
            )
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(router.subscriber_count(&Topic::ActivityFeed).await, 0);
    }

    #[tokio::test]
    async fn disconnect_clears_all_topics() {
        let router = TopicRouter::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let socket = SocketId::next();
        router.subscribe(Topic::Leaderboard, socket, tx.clone()).await;
        router.subscribe(Topic::ActivityFeed, socket, tx).await;

        router.disconnect(socket).await;
        assert_eq!(router.subscriber_count(&Topic::Leaderboard).await, 0);
        assert_eq!(router.subscriber_count(&Topic::ActivityFeed).await, 0);
    }
}
