//! Client meetings and their lifecycle.

pub mod lifecycle;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::LocationFix;

pub use lifecycle::MeetingLifecycle;
pub use store::MeetingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    NotStarted,
    Active,
    Completed,
}

impl MeetingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::NotStarted => "not_started",
            MeetingStatus::Active => "active",
            MeetingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(MeetingStatus::NotStarted),
            "active" => Some(MeetingStatus::Active),
            "completed" => Some(MeetingStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to a meeting (photo, visiting card, signed form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl AttachmentRef {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            content_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub client_id: String,
    pub status: MeetingStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_location: Option<LocationFix>,
    pub end_location: Option<LocationFix>,
    pub comments: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    pub client_status_change: Option<String>,
}

impl Meeting {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            status: MeetingStatus::NotStarted,
            start_time: None,
            end_time: None,
            start_location: None,
            end_location: None,
            comments: None,
            attachments: Vec::new(),
            client_status_change: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MeetingStatus::Active
    }

    /// Time between start and end, once both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }
}

/// Data captured when the user finishes a meeting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndMeeting {
    pub comments: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub client_status_change: Option<String>,
    pub location: Option<LocationFix>,
}
