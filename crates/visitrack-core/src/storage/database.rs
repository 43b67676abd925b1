//! SQLite-backed storage.
//!
//! Provides persistent storage for:
//! - Periodic location snapshots (`location_log`)
//! - The client registry
//! - Meetings, with attachments and locations as JSON
//! - Key-value store for application state
//!
//! `Database` implements the engine's collaborator traits so the CLI can
//! run tracking and meetings against a local file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{data_dir, migrations};
use crate::error::{DatabaseError, PersistError};
use crate::location::LocationFix;
use crate::meeting::{AttachmentRef, Meeting, MeetingStatus, MeetingStore};
use crate::proximity::TrackableEntity;
use crate::registry::{Client, ClientRegistry};
use crate::tracking::{FixRecord, FixSink};

/// One row of the location log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationLogEntry {
    pub id: i64,
    #[serde(flatten)]
    pub record: FixRecord,
}

/// SQLite database for tracking data.
pub struct Database {
    conn: Mutex<Connection>,
}

const MEETING_COLUMNS: &str = "id, client_id, status, start_time, end_time, start_location,
     end_location, comments, attachments, client_status_change";

type MeetingRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

impl Database {
    /// Open the database at `~/.config/visitrack/visitrack.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("visitrack.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Location log ───────────────────────────────────────────────────

    pub fn record_fix(&self, record: &FixRecord) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO location_log (user_id, latitude, longitude, accuracy_m, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.user_id,
                record.latitude,
                record.longitude,
                record.accuracy_m,
                record.captured_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent log entries first.
    pub fn list_fixes(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LocationLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, latitude, longitude, accuracy_m, captured_at
             FROM location_log
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY captured_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, user_id, latitude, longitude, accuracy_m, captured_at) = row?;
            entries.push(LocationLogEntry {
                id,
                record: FixRecord {
                    user_id,
                    latitude,
                    longitude,
                    accuracy_m,
                    captured_at: parse_time("location_log", &captured_at)?,
                },
            });
        }
        Ok(entries)
    }

    // ── Clients ────────────────────────────────────────────────────────

    /// Insert or replace a client.
    pub fn upsert_client(&self, client: &Client) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO clients (id, name, latitude, longitude, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                status = excluded.status",
            params![
                client.id,
                client.name,
                client.latitude,
                client.longitude,
                client.status,
            ],
        )?;
        Ok(())
    }

    pub fn get_client(&self, id: &str) -> Result<Option<Client>, DatabaseError> {
        let conn = self.conn();
        let client = conn
            .query_row(
                "SELECT id, name, latitude, longitude, status FROM clients WHERE id = ?1",
                params![id],
                client_from_row,
            )
            .optional()?;
        Ok(client)
    }

    pub fn list_clients(&self) -> Result<Vec<Client>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, latitude, longitude, status FROM clients ORDER BY name")?;
        let clients = stmt
            .query_map([], client_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clients)
    }

    /// Returns `false` if no such client existed.
    pub fn delete_client(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self.conn().execute("DELETE FROM clients WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // ── Meetings ───────────────────────────────────────────────────────

    pub fn insert_meeting(&self, meeting: &Meeting) -> Result<(), DatabaseError> {
        let row = meeting_to_row(meeting)?;
        self.conn().execute(
            &format!(
                "INSERT INTO meetings ({MEETING_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9],
        )?;
        Ok(())
    }

    /// Returns `false` if the meeting does not exist.
    pub fn update_meeting(&self, meeting: &Meeting) -> Result<bool, DatabaseError> {
        let row = meeting_to_row(meeting)?;
        let n = self.conn().execute(
            "UPDATE meetings SET
                client_id = ?2, status = ?3, start_time = ?4, end_time = ?5,
                start_location = ?6, end_location = ?7, comments = ?8,
                attachments = ?9, client_status_change = ?10
             WHERE id = ?1",
            params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9],
        )?;
        Ok(n > 0)
    }

    pub fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, DatabaseError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
                params![id],
                meeting_row,
            )
            .optional()?;
        row.map(meeting_from_row).transpose()
    }

    /// Meetings filtered by status, most recently started first.
    pub fn list_meetings(
        &self,
        status: Option<MeetingStatus>,
    ) -> Result<Vec<Meeting>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY start_time DESC"
        ))?;
        let rows = stmt
            .query_map(params![status.map(MeetingStatus::as_str)], meeting_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(meeting_from_row).collect()
    }
}

fn client_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        status: row.get(4)?,
    })
}

fn meeting_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MeetingRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn meeting_to_row(m: &Meeting) -> Result<MeetingRow, DatabaseError> {
    let json = |value: &Option<LocationFix>| -> Result<Option<String>, DatabaseError> {
        value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))
    };
    Ok((
        m.id.clone(),
        m.client_id.clone(),
        m.status.as_str().to_string(),
        m.start_time.map(|t| t.to_rfc3339()),
        m.end_time.map(|t| t.to_rfc3339()),
        json(&m.start_location)?,
        json(&m.end_location)?,
        m.comments.clone(),
        serde_json::to_string(&m.attachments).map_err(|e| corrupt(e.to_string()))?,
        m.client_status_change.clone(),
    ))
}

fn meeting_from_row(row: MeetingRow) -> Result<Meeting, DatabaseError> {
    let (id, client_id, status, start, end, start_loc, end_loc, comments, attachments, change) =
        row;
    let location = |raw: Option<String>| -> Result<Option<LocationFix>, DatabaseError> {
        raw.map(|s| serde_json::from_str(&s).map_err(|e| corrupt(e.to_string())))
            .transpose()
    };
    let time = |raw: Option<String>| raw.map(|s| parse_time("meetings", &s)).transpose();

    Ok(Meeting {
        status: MeetingStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown status '{status}' for meeting {id}")))?,
        id,
        client_id,
        start_time: time(start)?,
        end_time: time(end)?,
        start_location: location(start_loc)?,
        end_location: location(end_loc)?,
        comments,
        attachments: serde_json::from_str(&attachments).map_err(|e| corrupt(e.to_string()))?,
        client_status_change: change,
    })
}

fn parse_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table,
            message: format!("bad timestamp '{raw}': {e}"),
        })
}

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: "meetings",
        message,
    }
}

#[async_trait]
impl FixSink for Database {
    async fn commit(&self, record: &FixRecord) -> Result<(), PersistError> {
        let id = self.record_fix(record)?;
        debug!(id, user_id = %record.user_id, "location snapshot stored");
        Ok(())
    }
}

#[async_trait]
impl MeetingStore for Database {
    async fn create(&self, meeting: &Meeting) -> Result<(), PersistError> {
        Ok(self.insert_meeting(meeting)?)
    }

    async fn update(&self, meeting: &Meeting) -> Result<(), PersistError> {
        if self.update_meeting(meeting)? {
            Ok(())
        } else {
            Err(PersistError::Missing(meeting.id.clone()))
        }
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, PersistError> {
        Ok(self.get_meeting(meeting_id)?)
    }

    async fn list_active(&self) -> Result<Vec<Meeting>, PersistError> {
        Ok(self.list_meetings(Some(MeetingStatus::Active))?)
    }

    /// Local attachments stay where they are; only their presence is checked.
    async fn upload_attachments(
        &self,
        _meeting_id: &str,
        attachments: &[AttachmentRef],
    ) -> Result<Vec<AttachmentRef>, PersistError> {
        for attachment in attachments {
            let path = attachment.uri.strip_prefix("file://").unwrap_or(&attachment.uri);
            if !Path::new(path).exists() {
                return Err(PersistError::AttachmentUpload {
                    name: attachment.name.clone(),
                    message: format!("file not found: {path}"),
                });
            }
        }
        Ok(attachments.to_vec())
    }
}

#[async_trait]
impl ClientRegistry for Database {
    async fn trackable_entities(&self) -> Result<Vec<TrackableEntity>, PersistError> {
        Ok(self.list_clients()?.iter().map(Client::trackable).collect())
    }

    async fn set_client_status(&self, client_id: &str, status: &str) -> Result<(), PersistError> {
        let n = self
            .conn()
            .execute(
                "UPDATE clients SET status = ?2 WHERE id = ?1",
                params![client_id, status],
            )
            .map_err(|e| PersistError::ClientStatus {
                client_id: client_id.to_string(),
                message: e.to_string(),
            })?;
        if n == 0 {
            return Err(PersistError::Missing(format!("client {client_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn client(id: &str, name: &str) -> Client {
        Client {
            id: id.into(),
            name: name.into(),
            latitude: 19.0760,
            longitude: 72.8777,
            status: None,
        }
    }

    #[test]
    fn record_and_list_fixes() {
        let db = Database::open_memory().unwrap();
        let t0 = Utc::now();
        for (i, user) in ["u-1", "u-2", "u-1"].iter().enumerate() {
            let fix = LocationFix::new(19.0 + i as f64, 72.0, t0 + Duration::minutes(i as i64));
            db.record_fix(&FixRecord::from_fix(user, &fix)).unwrap();
        }

        let all = db.list_fixes(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].record.latitude, 21.0);

        let mine = db.list_fixes(Some("u-1"), 10).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|e| e.record.user_id == "u-1"));

        assert_eq!(db.list_fixes(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn client_crud() {
        let db = Database::open_memory().unwrap();
        db.upsert_client(&client("c-2", "Zenith Labs")).unwrap();
        db.upsert_client(&client("c-1", "Acme Traders")).unwrap();

        let names: Vec<_> = db.list_clients().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["Acme Traders", "Zenith Labs"]);

        let mut renamed = client("c-1", "Acme Traders Pvt");
        renamed.status = Some("lead".into());
        db.upsert_client(&renamed).unwrap();
        assert_eq!(db.get_client("c-1").unwrap(), Some(renamed));

        assert!(db.delete_client("c-2").unwrap());
        assert!(!db.delete_client("c-2").unwrap());
        assert!(db.get_client("c-2").unwrap().is_none());
    }

    #[test]
    fn meeting_round_trip() {
        let db = Database::open_memory().unwrap();
        let mut meeting = Meeting::new("c-1");
        meeting.status = MeetingStatus::Active;
        meeting.start_time = Some(Utc::now());
        meeting.start_location = Some(LocationFix::new(19.07, 72.87, Utc::now()).with_accuracy(8.0));
        db.insert_meeting(&meeting).unwrap();

        meeting.status = MeetingStatus::Completed;
        meeting.comments = Some("signed the order".into());
        meeting.attachments = vec![AttachmentRef::new("card.jpg", "file:///tmp/card.jpg")];
        assert!(db.update_meeting(&meeting).unwrap());

        let loaded = db.get_meeting(&meeting.id).unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Completed);
        assert_eq!(loaded.comments.as_deref(), Some("signed the order"));
        assert_eq!(loaded.attachments, meeting.attachments);
        assert_eq!(loaded.start_location.unwrap().accuracy_m, Some(8.0));

        assert!(!db.update_meeting(&Meeting::new("c-9")).unwrap());
    }

    #[test]
    fn list_meetings_filters_by_status() {
        let db = Database::open_memory().unwrap();
        let mut active = Meeting::new("c-1");
        active.status = MeetingStatus::Active;
        db.insert_meeting(&active).unwrap();
        db.insert_meeting(&Meeting::new("c-2")).unwrap();

        assert_eq!(db.list_meetings(None).unwrap().len(), 2);
        let only_active = db.list_meetings(Some(MeetingStatus::Active)).unwrap();
        assert_eq!(only_active.len(), 1);
        assert_eq!(only_active[0].id, active.id);
    }

    #[tokio::test]
    async fn registry_status_updates() {
        let db = Database::open_memory().unwrap();
        db.upsert_client(&client("c-1", "Acme")).unwrap();

        db.set_client_status("c-1", "follow-up").await.unwrap();
        assert_eq!(db.get_client("c-1").unwrap().unwrap().status.as_deref(), Some("follow-up"));
        assert!(matches!(
            db.set_client_status("c-404", "lead").await,
            Err(PersistError::Missing(_))
        ));

        let entities = db.trackable_entities().await.unwrap();
        assert_eq!(entities, vec![TrackableEntity::new("c-1", 19.0760, 72.8777)]);
    }

    #[tokio::test]
    async fn missing_attachment_fails_upload() {
        let db = Database::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("photo.jpg");
        std::fs::write(&present, b"jpeg").unwrap();

        let ok = AttachmentRef::new("photo.jpg", present.display().to_string());
        assert_eq!(db.upload_attachments("m-1", &[ok.clone()]).await.unwrap(), vec![ok]);

        let missing = AttachmentRef::new("gone.jpg", "file:///nonexistent/gone.jpg");
        assert!(matches!(
            db.upload_attachments("m-1", &[missing]).await,
            Err(PersistError::AttachmentUpload { .. })
        ));
    }
}
