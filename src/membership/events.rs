//! Cluster events handed to the gossip layer.

use crate::types::NodeMeta;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// What happened to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    /// The member is (or already was) a voter.
    RaftJoinSuccess,
    /// The member was removed from the configuration.
    RaftLeaveSuccess,
}

/// A membership outcome announced to the rest of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// What happened.
    #[serde(rename = "Action")]
    pub action: EventAction,
    /// The member it happened to.
    #[serde(rename = "NodeMeta")]
    pub node: NodeMeta,
}

impl ClusterEvent {
    /// A join event for `node`.
    pub fn joined(node: NodeMeta) -> Self {
        Self {
            action: EventAction::RaftJoinSuccess,
            node,
        }
    }

    /// A leave event for `node`.
    pub fn left(node: NodeMeta) -> Self {
        Self {
            action: EventAction::RaftLeaveSuccess,
            node,
        }
    }
}

/// Sink for cluster events. Must never block the caller.
pub trait EventPublisher: Send + Sync {
    /// Hand an event to the dissemination layer.
    fn publish(&self, event: ClusterEvent);
}

/// Bounded in-process event queue.
///
/// When full, the oldest event is discarded to make room; the number of
/// discarded events is available from [`BroadcastQueue::dropped`].
#[derive(Debug)]
pub struct BroadcastQueue {
    events: Mutex<VecDeque<ClusterEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl BroadcastQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take the oldest event without waiting.
    pub fn try_next(&self) -> Option<ClusterEvent> {
        self.events.lock().pop_front()
    }

    /// Wait for the next event.
    pub async fn next(&self) -> ClusterEvent {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<ClusterEvent> {
        self.events.lock().drain(..).collect()
    }
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventPublisher for BroadcastQueue {
    fn publish(&self, event: ClusterEvent) {
        {
            let mut events = self.events.lock();
            if events.len() >= self.capacity {
                events.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "event queue full, discarding oldest event");
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }
}
