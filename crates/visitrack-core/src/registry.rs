//! Client registry collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::proximity::TrackableEntity;

/// A client as known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Free-form pipeline status ("lead", "follow-up", ...).
    #[serde(default)]
    pub status: Option<String>,
}

impl Client {
    pub fn trackable(&self) -> TrackableEntity {
        TrackableEntity::new(self.id.clone(), self.latitude, self.longitude)
    }
}

/// Source of client coordinates for proximity checks, and the sink for
/// client status changes recorded at the end of a meeting.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn trackable_entities(&self) -> Result<Vec<TrackableEntity>, PersistError>;

    async fn set_client_status(&self, client_id: &str, status: &str) -> Result<(), PersistError>;
}
