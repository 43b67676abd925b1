use async_trait::async_trait;

use super::{AttachmentRef, Meeting};
use crate::error::PersistError;

/// Persistence collaborator for meetings.
///
/// Stores never enforce the one-active-meeting-per-client rule; that is
/// the lifecycle's job.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn create(&self, meeting: &Meeting) -> Result<(), PersistError>;

    async fn update(&self, meeting: &Meeting) -> Result<(), PersistError>;

    async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, PersistError>;

    /// Meetings stored as active, used to recover after a restart.
    async fn list_active(&self) -> Result<Vec<Meeting>, PersistError>;

    /// Upload attachments and return the stored references.
    async fn upload_attachments(
        &self,
        meeting_id: &str,
        attachments: &[AttachmentRef],
    ) -> Result<Vec<AttachmentRef>, PersistError>;
}
