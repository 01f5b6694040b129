//! Progress events published at each phase transition and candidate attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::HealingPhase;

const DEFAULT_BUFFER: usize = 256;

/// One progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Session the event belongs to
    pub session_id: Uuid,
    /// Phase after the update
    pub phase: HealingPhase,
    /// Failed candidate attempts so far
    pub attempts_count: u32,
    /// Completion fraction
    pub progress: f32,
    /// Human-readable detail
    pub message: String,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

/// Broadcast channel for progress events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    /// Create a bus; the buffer is clamped to at least the default capacity
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(DEFAULT_BUFFER));
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn emit(
        &self,
        session_id: Uuid,
        phase: HealingPhase,
        attempts_count: u32,
        message: impl Into<String>,
    ) {
        let _ = self.sender.send(ProgressEvent {
            session_id,
            phase,
            attempts_count,
            progress: phase.progress(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Current subscriber count
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.emit(id, HealingPhase::Analyzing, 0, "fingerprint lookup");
        bus.emit(id, HealingPhase::Generating, 0, "5 candidates");
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.phase, HealingPhase::Analyzing);
        assert_eq!(second.message, "5 candidates");
        assert!(second.progress > first.progress);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(1);
        assert_eq!(bus.receiver_count(), 0);
        bus.emit(Uuid::new_v4(), HealingPhase::Failed, 3, "disabled");
    }
}
