//! Background tracking: periodic persistence of fixes and the supervisor
//! that runs sampling, persistence and proximity evaluation as one unit.

pub mod persister;
pub mod supervisor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::location::LocationFix;

pub use persister::{CheckOutcome, PeriodicPersister, PersistSchedule};
pub use supervisor::{TrackingOptions, TrackingStatus, TrackingSupervisor};

/// Payload handed to the fix persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl FixRecord {
    pub fn from_fix(user_id: &str, fix: &LocationFix) -> Self {
        Self {
            user_id: user_id.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_m: fix.accuracy_m,
            captured_at: fix.captured_at,
        }
    }
}

/// Durable destination for periodic location snapshots.
#[async_trait]
pub trait FixSink: Send + Sync {
    async fn commit(&self, record: &FixRecord) -> Result<(), PersistError>;
}

/// One-way, best-effort display surface (e.g. an ongoing notification).
pub trait StatusSink: Send + Sync {
    fn publish(&self, text: &str);
}

/// Status sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn publish(&self, _text: &str) {}
}
