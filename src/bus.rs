//! Governance event bus.
//!
//! Broadcast-based publish/subscribe hub carrying [`GovernanceEvent`]
//! values between monitors, the coordinator, and external subscribers,
//! while retaining a bounded history plus counters for diagnostics.
//! Publishing never blocks and never fails: a bus with no subscribers
//! simply records the event in history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

use crate::events::GovernanceEvent;

/// Snapshot of bus state for CLI/status reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BusSnapshot {
    pub recent: Vec<GovernanceEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub per_topic: HashMap<String, u64>,
}

/// Broadcast hub retaining a bounded history of governance events.
pub struct EventBus {
    tx: broadcast::Sender<GovernanceEvent>,
    history: Mutex<VecDeque<GovernanceEvent>>,
    history_capacity: usize,
    per_topic: Mutex<HashMap<String, u64>>,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl EventBus {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            per_topic: Mutex::new(HashMap::new()),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers and record it in history.
    pub fn publish(&self, event: GovernanceEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut per_topic) = self.per_topic.lock() {
            *per_topic.entry(event.topic()).or_insert(0) += 1;
        }

        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No receivers is a legal state, not an error.
        let _ = self.tx.send(event);
    }

    /// Subscribe to the live event stream. Each subscriber receives an
    /// independent copy of every event published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as an async `Stream`, for consumers that drive the bus
    /// with stream combinators instead of an explicit recv loop.
    pub fn stream(&self) -> BroadcastStream<GovernanceEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Subscribe via an unbounded mpsc channel for consumers that cannot
    /// tolerate broadcast lag drops (diagnostics, tests).
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<GovernanceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Number of events recorded since construction.
    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    /// Count of events published under a given topic.
    pub fn topic_count(&self, topic: &str) -> u64 {
        self.per_topic
            .lock()
            .map(|m| m.get(topic).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BusSnapshot {
        let recent = self
            .history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default();
        let per_topic = self
            .per_topic
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        BusSnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
            per_topic,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::PerfState;

    fn heartbeat_event() -> GovernanceEvent {
        GovernanceEvent::PerformanceEmergency {
            level: PerfState::S4,
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(heartbeat_event());
        assert_eq!(bus.total_events(), 1);
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let bus = EventBus::new(16, 3);
        for _ in 0..5 {
            bus.publish(GovernanceEvent::RafRestart);
        }
        let snapshot = bus.snapshot();
        assert_eq!(snapshot.recent.len(), 3, "history must stay bounded");
        assert_eq!(snapshot.total_events, 5);
        assert_eq!(snapshot.dropped_events, 2);
    }

    #[test]
    fn test_topic_counters() {
        let bus = EventBus::default();
        bus.publish(GovernanceEvent::RafRestart);
        bus.publish(GovernanceEvent::RafRestart);
        bus.publish(heartbeat_event());
        assert_eq!(bus.topic_count("raf:restart"), 2);
        assert_eq!(bus.topic_count("performance:emergency"), 1);
        assert_eq!(bus.topic_count("memory:warning"), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_independent_copies() {
        let bus = EventBus::default();
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.publish(GovernanceEvent::SoftRestart);

        assert_eq!(rx_a.recv().await.expect("rx_a"), GovernanceEvent::SoftRestart);
        assert_eq!(rx_b.recv().await.expect("rx_b"), GovernanceEvent::SoftRestart);
    }
}
