//! Domain events broadcast by the attendance engine
//!
//! Events are informational: they feed live dashboards over SSE and never
//! drive state changes. A dropped event loses nothing persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Attendance domain events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UaEvent {
    /// A badge scan was appended to the audit trail
    ScanRecorded {
        scan_id: i64,
        uid: String,
        identity_id: Option<i64>,
        section_id: Option<i64>,
        /// Outcome kind, e.g. `recorded`, `unknown_tag`
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// An enrollment moved to a higher warning level
    WarningEscalated {
        identity_id: i64,
        section_id: i64,
        previous_level: u8,
        new_level: u8,
        failed: bool,
        timestamp: DateTime<Utc>,
    },

    /// The session closer inserted absences for one section
    AbsencesMarked {
        section_id: i64,
        session_date: String,
        count: u64,
        timestamp: DateTime<Utc>,
    },
}

impl UaEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            UaEvent::ScanRecorded { .. } => "ScanRecorded",
            UaEvent::WarningEscalated { .. } => "WarningEscalated",
            UaEvent::AbsencesMarked { .. } => "AbsencesMarked",
        }
    }
}

/// Broadcast bus for [`UaEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<UaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: UaEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escalation() -> UaEvent {
        UaEvent::WarningEscalated {
            identity_id: 7,
            section_id: 3,
            previous_level: 0,
            new_level: 1,
            failed: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let event = escalation();

        bus.emit_lossy(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(escalation());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(escalation()).unwrap();
        assert_eq!(json["type"], "WarningEscalated");
        assert_eq!(json["new_level"], 1);
    }
}
