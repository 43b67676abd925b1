use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::location::LocationFix;

/// Every observable change in the engine produces an Event.
/// The CLI prints them; a UI layer subscribes to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TrackingStarted {
        interval_ms: u64,
        at: DateTime<Utc>,
    },
    TrackingStopped {
        at: DateTime<Utc>,
    },
    /// The sampler ended on its own with a terminal error.
    SamplerFailed {
        reason: String,
        at: DateTime<Utc>,
    },
    FixCommitted {
        fix: LocationFix,
        at: DateTime<Utc>,
    },
    /// A periodic save failed; the newest fix is retried on the next check.
    CommitFailed {
        reason: String,
        at: DateTime<Utc>,
    },
    ProximityEntered {
        entity_id: String,
        distance_m: f64,
        fix: LocationFix,
        at: DateTime<Utc>,
    },
    MeetingStarted {
        meeting_id: String,
        client_id: String,
        at: DateTime<Utc>,
    },
    MeetingEnded {
        meeting_id: String,
        client_id: String,
        duration_secs: i64,
        at: DateTime<Utc>,
    },
}

/// In-memory fan-out of [`Event`]s.
///
/// Delivery is at-most-once: a receiver that falls more than `capacity`
/// events behind loses the oldest ones. Publishing with no subscribers is
/// not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
