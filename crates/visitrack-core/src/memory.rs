//! In-memory collaborators.
//!
//! Used by tests and by embedders that do not need durable storage. Each
//! one can be told to fail so retry paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PersistError;
use crate::meeting::{AttachmentRef, Meeting, MeetingStatus, MeetingStore};
use crate::proximity::TrackableEntity;
use crate::registry::{Client, ClientRegistry};
use crate::tracking::{FixRecord, FixSink, StatusSink};

#[derive(Debug, Default)]
pub struct MemoryFixSink {
    records: Mutex<Vec<FixRecord>>,
    failures: AtomicUsize,
}

impl MemoryFixSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` commits.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<FixRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl FixSink for MemoryFixSink {
    async fn commit(&self, record: &FixRecord) -> Result<(), PersistError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PersistError::CommitFailed("network unreachable".into()));
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMeetingStore {
    meetings: Mutex<HashMap<String, Meeting>>,
    fail_writes: AtomicBool,
    fail_uploads: AtomicBool,
}

impl MemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Meeting>> {
        self.meetings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), PersistError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistError::CommitFailed("meeting store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MeetingStore for MemoryMeetingStore {
    async fn create(&self, meeting: &Meeting) -> Result<(), PersistError> {
        self.check_writable()?;
        self.lock().insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn update(&self, meeting: &Meeting) -> Result<(), PersistError> {
        self.check_writable()?;
        let mut meetings = self.lock();
        if !meetings.contains_key(&meeting.id) {
            return Err(PersistError::Missing(meeting.id.clone()));
        }
        meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, PersistError> {
        Ok(self.lock().get(meeting_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Meeting>, PersistError> {
        Ok(self
            .lock()
            .values()
            .filter(|m| m.status == MeetingStatus::Active)
            .cloned()
            .collect())
    }

    async fn upload_attachments(
        &self,
        _meeting_id: &str,
        attachments: &[AttachmentRef],
    ) -> Result<Vec<AttachmentRef>, PersistError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            let name = attachments.first().map(|a| a.name.clone()).unwrap_or_default();
            return Err(PersistError::AttachmentUpload {
                name,
                message: "upload timed out".into(),
            });
        }
        Ok(attachments.to_vec())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    clients: Mutex<Vec<Client>>,
    fail_status_updates: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: Vec<Client>) -> Self {
        Self {
            clients: Mutex::new(clients),
            fail_status_updates: AtomicBool::new(false),
        }
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    pub fn status_of(&self, client_id: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|c| c.id == client_id)
            .and_then(|c| c.status.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Client>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ClientRegistry for MemoryRegistry {
    async fn trackable_entities(&self) -> Result<Vec<TrackableEntity>, PersistError> {
        Ok(self.lock().iter().map(Client::trackable).collect())
    }

    async fn set_client_status(&self, client_id: &str, status: &str) -> Result<(), PersistError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(PersistError::ClientStatus {
                client_id: client_id.to_string(),
                message: "registry unavailable".into(),
            });
        }
        let mut clients = self.lock();
        let client = clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| PersistError::Missing(format!("client {client_id}")))?;
        client.status = Some(status.to_string());
        Ok(())
    }
}

/// Keeps every published status line.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StatusSink for MemoryStatusSink {
    fn publish(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
    }
}
