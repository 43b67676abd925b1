//! Meeting commands for CLI.
//!
//! Every invocation restores the active meetings from the database first,
//! so the one-active-meeting-per-client rule holds across processes.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;
use visitrack_core::{
    AttachmentRef, Database, EndMeeting, LocationFix, MeetingLifecycle, MeetingStatus,
    ProximityEngine,
};

use super::{runtime, CmdResult};

#[derive(Subcommand)]
pub enum MeetingAction {
    /// Start a meeting with a client
    Start {
        client_id: String,
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,
    },
    /// End an active meeting
    End {
        meeting_id: String,
        /// Meeting notes
        #[arg(long)]
        comment: Option<String>,
        /// Attach a file (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        /// New pipeline status for the client
        #[arg(long)]
        client_status: Option<String>,
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,
    },
    /// List meetings
    List {
        /// Filter by status: not_started, active, completed
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one meeting
    Show {
        meeting_id: String,
    },
}

fn location(lat: Option<f64>, lng: Option<f64>) -> Option<LocationFix> {
    Some(LocationFix::new(lat?, lng?, Utc::now()))
}

pub fn run(action: MeetingAction) -> CmdResult {
    let db = Arc::new(Database::open()?);

    match action {
        MeetingAction::Start { client_id, lat, lng } => {
            if db.get_client(&client_id)?.is_none() {
                return Err(format!("client not found: {client_id}").into());
            }
            let lifecycle = lifecycle(&db);
            let meeting = runtime()?.block_on(async {
                lifecycle.restore().await?;
                Ok::<_, Box<dyn std::error::Error>>(
                    lifecycle.start_meeting(&client_id, location(lat, lng)).await?,
                )
            })?;
            println!("Meeting started: {}", meeting.id);
            println!("{}", serde_json::to_string_pretty(&meeting)?);
        }
        MeetingAction::End {
            meeting_id,
            comment,
            attachments,
            client_status,
            lat,
            lng,
        } => {
            let attachments = attachments
                .iter()
                .map(|path| {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    AttachmentRef::new(name, path.display().to_string())
                })
                .collect();
            let end = EndMeeting {
                comments: comment,
                attachments,
                client_status_change: client_status,
                location: location(lat, lng),
            };
            let lifecycle = lifecycle(&db);
            let meeting = runtime()?.block_on(async {
                lifecycle.restore().await?;
                Ok::<_, Box<dyn std::error::Error>>(lifecycle.end_meeting(&meeting_id, end).await?)
            })?;
            let minutes = meeting.duration().map(|d| d.num_minutes()).unwrap_or(0);
            println!("Meeting completed: {} ({minutes} min)", meeting.id);
            println!("{}", serde_json::to_string_pretty(&meeting)?);
        }
        MeetingAction::List { status } => {
            let status = status
                .map(|s| MeetingStatus::parse(&s).ok_or_else(|| format!("unknown status: {s}")))
                .transpose()?;
            let meetings = db.list_meetings(status)?;
            println!("{}", serde_json::to_string_pretty(&meetings)?);
        }
        MeetingAction::Show { meeting_id } => match db.get_meeting(&meeting_id)? {
            Some(meeting) => println!("{}", serde_json::to_string_pretty(&meeting)?),
            None => return Err(format!("meeting not found: {meeting_id}").into()),
        },
    }
    Ok(())
}

fn lifecycle(db: &Arc<Database>) -> MeetingLifecycle {
    MeetingLifecycle::new(
        Arc::clone(db) as _,
        Arc::clone(db) as _,
        Arc::new(ProximityEngine::new()),
    )
}
