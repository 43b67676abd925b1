//! Tracking commands for CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use visitrack_core::{
    Config, Database, Event, MeetingError, MeetingLifecycle, ProximityEngine, ProximityEntry,
    ReplayEnd, ReplayPoint, ReplayProvider, StatusSink, TrackingSupervisor,
};

use super::{runtime, CmdResult};

#[derive(Subcommand)]
pub enum TrackAction {
    /// Run a tracking session over a recorded path (JSON array of points)
    Replay {
        path: PathBuf,
        /// Tracking user id (defaults to tracking.user_id)
        #[arg(long)]
        user: Option<String>,
        /// Fix cadence in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Minimum seconds between stored snapshots
        #[arg(long)]
        save_interval_secs: Option<u64>,
        /// Seconds between persistence checks
        #[arg(long)]
        check_interval_secs: Option<u64>,
    },
}

/// Sends the status line to the log instead of a notification.
struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, text: &str) {
        debug!(status = text, "tracking status");
    }
}

pub fn run(action: TrackAction) -> CmdResult {
    match action {
        TrackAction::Replay {
            path,
            user,
            interval_ms,
            save_interval_secs,
            check_interval_secs,
        } => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let points: Vec<ReplayPoint> = serde_json::from_str(&raw)?;
            if points.is_empty() {
                return Err("replay file has no points".into());
            }

            let config = Config::load()?;
            let mut options = config.tracking_options();
            if let Some(user) = user {
                options.user_id = user;
            }
            if let Some(ms) = interval_ms {
                if ms == 0 {
                    return Err("--interval-ms must be greater than zero".into());
                }
                options.request.interval = Duration::from_millis(ms);
            }
            if let Some(secs) = save_interval_secs {
                options.schedule.save_interval = Duration::from_secs(secs);
            }
            if let Some(secs) = check_interval_secs.filter(|s| *s > 0) {
                options.schedule.check_interval = Duration::from_secs(secs);
            }

            let duration = replay_duration(options.request.interval, points.len())
                .ok_or("replay is too long for the requested interval")?;
            let provider = ReplayProvider::new(points).with_end(ReplayEnd::Finish);
            let db = Arc::new(Database::open()?);

            runtime()?.block_on(async move {
                let proximity = Arc::new(ProximityEngine::new());
                let supervisor = TrackingSupervisor::new(
                    Arc::new(provider),
                    Arc::clone(&db) as _,
                    Arc::clone(&db) as _,
                )
                .with_proximity(Arc::clone(&proximity))
                .with_status_sink(Arc::new(LogStatusSink));
                let lifecycle = MeetingLifecycle::new(
                    Arc::clone(&db) as _,
                    Arc::clone(&db) as _,
                    proximity,
                )
                .with_events(supervisor.events().clone());
                lifecycle.restore().await?;

                let (done_tx, done_rx) = watch::channel(false);
                let printer = tokio::spawn(print_events(
                    supervisor.events().subscribe(),
                    done_rx,
                    config.meeting.auto_start_on_proximity.then_some(lifecycle),
                ));

                supervisor.start(options).await?;
                tokio::time::sleep(duration).await;
                let status = supervisor.stop().await;
                info!(is_running = status.is_running, "replay finished");

                let _ = done_tx.send(true);
                printer.await?;
                Ok::<_, Box<dyn std::error::Error>>(())
            })?;
        }
    }
    Ok(())
}

/// Time to play every point once, plus half an interval so the last fix
/// lands before the session is stopped.
fn replay_duration(interval: Duration, points: usize) -> Option<Duration> {
    let points = u32::try_from(points).ok()?;
    interval.checked_mul(points)?.checked_add(interval / 2)
}

/// Print every engine event as one JSON line, opening meetings on arrival
/// when `lifecycle` is given.
async fn print_events(
    mut events: broadcast::Receiver<Event>,
    mut done: watch::Receiver<bool>,
    lifecycle: Option<MeetingLifecycle>,
) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "event printer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = done.changed() => break,
        };

        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "cannot encode event"),
        }

        if let (Some(lifecycle), Event::ProximityEntered { entity_id, distance_m, fix, .. }) =
            (&lifecycle, event)
        {
            let entry = ProximityEntry {
                entity_id,
                distance_m,
                fix,
            };
            match lifecycle.start_from_entry(&entry).await {
                Ok(_) => {}
                Err(MeetingError::Conflict { meeting_id, .. }) => {
                    debug!(%meeting_id, "client already in a meeting")
                }
                Err(err) => warn!(error = %err, "automatic meeting start failed"),
            }
        }
    }
}
