//! Core error types for visitrack-core.
//!
//! Errors are split by the component that raises them. Only terminal
//! sampler failures and meeting invariant violations are meant to reach
//! the caller; transient failures are logged and retried internally.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by a location provider.
///
/// `PermissionDenied` and `ServiceDisabled` end the session; the user has
/// to fix the cause before tracking can be started again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    #[error("location permission not granted")]
    PermissionDenied,

    #[error("location services are disabled")]
    ServiceDisabled,

    /// A single acquisition attempt failed; the next one may succeed.
    #[error("location provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("location sampler is already running")]
    AlreadyRunning,
}

impl SamplerError {
    /// Whether the error ends the current tracking session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SamplerError::PermissionDenied | SamplerError::ServiceDisabled)
    }
}

/// A persistence collaborator rejected or failed a write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("attachment upload failed for '{name}': {message}")]
    AttachmentUpload { name: String, message: String },

    #[error("client '{client_id}' status update failed: {message}")]
    ClientStatus { client_id: String, message: String },

    #[error("record not found: {0}")]
    Missing(String),
}

/// Workflow errors from the meeting state machine.
///
/// These indicate the caller's view is out of sync with the engine and
/// are never swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeetingError {
    #[error("client '{client_id}' already has an active meeting ({meeting_id})")]
    Conflict {
        client_id: String,
        meeting_id: String,
    },

    #[error("meeting not found: {0}")]
    NotFound(String),

    #[error("meeting {meeting_id} is {status}, cannot {action}")]
    InvalidState {
        meeting_id: String,
        status: String,
        action: &'static str,
    },

    /// End-of-meeting data could not be committed; the meeting is still active.
    #[error("meeting {meeting_id} not saved: {source}")]
    Persist {
        meeting_id: String,
        #[source]
        source: PersistError,
    },
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<DatabaseError> for PersistError {
    fn from(err: DatabaseError) -> Self {
        PersistError::CommitFailed(err.to_string())
    }
}
