//! Meeting state machine.
//!
//! ```text
//! NotStarted -> Active -> Completed
//! ```
//!
//! Active meetings are indexed in memory under one lock, which makes the
//! "at most one active meeting per client" check and the insert a single
//! step. Storage is written after the index is updated and the reservation
//! is rolled back if the write fails.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::{EndMeeting, Meeting, MeetingStatus, MeetingStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{MeetingError, PersistError};
use crate::events::{Event, EventBus};
use crate::location::LocationFix;
use crate::proximity::{ProximityEngine, ProximityEntry};
use crate::registry::ClientRegistry;

#[derive(Debug, Default)]
struct ActiveMeetings {
    by_id: HashMap<String, Meeting>,
    by_client: HashMap<String, String>,
    /// Meetings with an end operation in flight.
    ending: HashSet<String>,
}

impl ActiveMeetings {
    fn insert(&mut self, meeting: Meeting) {
        self.by_client
            .insert(meeting.client_id.clone(), meeting.id.clone());
        self.by_id.insert(meeting.id.clone(), meeting);
    }

    fn remove(&mut self, meeting_id: &str) -> Option<Meeting> {
        let meeting = self.by_id.remove(meeting_id)?;
        self.by_client.remove(&meeting.client_id);
        self.ending.remove(meeting_id);
        Some(meeting)
    }
}

pub struct MeetingLifecycle {
    store: Arc<dyn MeetingStore>,
    registry: Arc<dyn ClientRegistry>,
    proximity: Arc<ProximityEngine>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    active: Mutex<ActiveMeetings>,
}

impl MeetingLifecycle {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        registry: Arc<dyn ClientRegistry>,
        proximity: Arc<ProximityEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            proximity,
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
            active: Mutex::new(ActiveMeetings::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Reload meetings the store still lists as active, e.g. after the
    /// process was restarted mid-visit. Returns how many were adopted.
    pub async fn restore(&self) -> Result<usize, PersistError> {
        let stored = self.store.list_active().await?;
        let mut active = self.lock();
        let mut adopted = 0;
        for meeting in stored {
            if let Some(existing) = active.by_client.get(&meeting.client_id) {
                warn!(
                    client_id = %meeting.client_id,
                    kept = %existing,
                    skipped = %meeting.id,
                    "more than one stored active meeting for client"
                );
                continue;
            }
            active.insert(meeting);
            adopted += 1;
        }
        if adopted > 0 {
            info!(count = adopted, "restored active meetings");
        }
        Ok(adopted)
    }

    /// Start a meeting with `client_id`.
    ///
    /// Manual starts are allowed; no prior proximity entry is required.
    pub async fn start_meeting(
        &self,
        client_id: &str,
        location: Option<LocationFix>,
    ) -> Result<Meeting, MeetingError> {
        let meeting = {
            let mut active = self.lock();
            if let Some(existing) = active.by_client.get(client_id) {
                return Err(MeetingError::Conflict {
                    client_id: client_id.to_string(),
                    meeting_id: existing.clone(),
                });
            }
            let mut meeting = Meeting::new(client_id);
            meeting.status = MeetingStatus::Active;
            meeting.start_time = Some(self.clock.utc_now());
            meeting.start_location = location;
            active.insert(meeting.clone());
            meeting
        };

        if let Err(source) = self.store.create(&meeting).await {
            self.lock().remove(&meeting.id);
            return Err(MeetingError::Persist {
                meeting_id: meeting.id,
                source,
            });
        }

        self.proximity.reset(client_id);
        info!(meeting_id = %meeting.id, client_id, "meeting started");
        self.events.emit(Event::MeetingStarted {
            meeting_id: meeting.id.clone(),
            client_id: client_id.to_string(),
            at: self.clock.utc_now(),
        });
        Ok(meeting)
    }

    /// Start a meeting at the position where proximity was detected.
    pub async fn start_from_entry(&self, entry: &ProximityEntry) -> Result<Meeting, MeetingError> {
        self.start_meeting(&entry.entity_id, Some(entry.fix)).await
    }

    /// Finish an active meeting.
    ///
    /// Attachments, the client status change and the meeting record are
    /// committed together. If any step fails the meeting stays active with
    /// the submitted notes kept, so the call can simply be repeated.
    pub async fn end_meeting(
        &self,
        meeting_id: &str,
        end: EndMeeting,
    ) -> Result<Meeting, MeetingError> {
        let draft = {
            let mut active = self.lock();
            if active.ending.contains(meeting_id) {
                return Err(MeetingError::InvalidState {
                    meeting_id: meeting_id.to_string(),
                    status: "ending".to_string(),
                    action: "end",
                });
            }
            match active.by_id.get_mut(meeting_id) {
                Some(meeting) => {
                    if end.comments.is_some() {
                        meeting.comments = end.comments.clone();
                    }
                    if !end.attachments.is_empty() {
                        meeting.attachments = end.attachments.clone();
                    }
                    if end.client_status_change.is_some() {
                        meeting.client_status_change = end.client_status_change.clone();
                    }
                    let draft = meeting.clone();
                    active.ending.insert(meeting_id.to_string());
                    Some(draft)
                }
                None => None,
            }
        };

        let Some(draft) = draft else {
            return Err(self.not_active(meeting_id).await);
        };

        let result = self.commit_end(&draft, end.location).await;
        let mut active = self.lock();
        match result {
            Ok(done) => {
                active.remove(meeting_id);
                drop(active);
                self.proximity.reset(&done.client_id);
                let duration_secs = done.duration().map(|d| d.num_seconds()).unwrap_or(0);
                info!(meeting_id, client_id = %done.client_id, duration_secs, "meeting completed");
                self.events.emit(Event::MeetingEnded {
                    meeting_id: done.id.clone(),
                    client_id: done.client_id.clone(),
                    duration_secs,
                    at: self.clock.utc_now(),
                });
                Ok(done)
            }
            Err(source) => {
                active.ending.remove(meeting_id);
                warn!(meeting_id, error = %source, "meeting end not committed, still active");
                Err(MeetingError::Persist {
                    meeting_id: meeting_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn commit_end(
        &self,
        draft: &Meeting,
        location: Option<LocationFix>,
    ) -> Result<Meeting, PersistError> {
        let attachments = if draft.attachments.is_empty() {
            Vec::new()
        } else {
            self.store
                .upload_attachments(&draft.id, &draft.attachments)
                .await?
        };
        if let Some(status) = &draft.client_status_change {
            self.registry
                .set_client_status(&draft.client_id, status)
                .await?;
        }

        let mut done = draft.clone();
        done.status = MeetingStatus::Completed;
        done.end_time = Some(self.clock.utc_now());
        done.end_location = location;
        done.attachments = attachments;
        self.store.update(&done).await?;
        Ok(done)
    }

    /// Error for an end request on a meeting that is not in the active index.
    async fn not_active(&self, meeting_id: &str) -> MeetingError {
        match self.store.get(meeting_id).await {
            Ok(Some(meeting)) => MeetingError::InvalidState {
                meeting_id: meeting_id.to_string(),
                status: meeting.status.to_string(),
                action: "end",
            },
            Ok(None) => MeetingError::NotFound(meeting_id.to_string()),
            Err(source) => MeetingError::Persist {
                meeting_id: meeting_id.to_string(),
                source,
            },
        }
    }

    /// Look up a meeting, active or stored.
    pub async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, PersistError> {
        if let Some(meeting) = self.lock().by_id.get(meeting_id) {
            return Ok(Some(meeting.clone()));
        }
        self.store.get(meeting_id).await
    }

    pub fn active_for_client(&self, client_id: &str) -> Option<Meeting> {
        let active = self.lock();
        let id = active.by_client.get(client_id)?;
        active.by_id.get(id).cloned()
    }

    pub fn active_meetings(&self) -> Vec<Meeting> {
        let mut meetings: Vec<Meeting> = self.lock().by_id.values().cloned().collect();
        meetings.sort_by_key(|m| m.start_time);
        meetings
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActiveMeetings> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
