//! Interval-based persistence of the newest fix.
//!
//! Sampling can run at sub-second cadence; writing every fix would swamp
//! storage. The persister keeps only the newest fix and commits it when a
//! check tick finds the save interval has elapsed. A failed commit leaves
//! `last_saved_at` untouched so the next tick retries with whatever fix is
//! newest by then.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{FixRecord, FixSink};
use crate::clock::Clock;
use crate::events::{Event, EventBus};
use crate::location::{FixStream, LocationFix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistSchedule {
    /// Minimum spacing between two commits.
    pub save_interval: Duration,
    /// How often the commit condition is checked.
    pub check_interval: Duration,
}

impl Default for PersistSchedule {
    fn default() -> Self {
        Self {
            save_interval: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(60),
        }
    }
}

/// Result of a single check tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckOutcome {
    /// No fix has been received yet.
    NoFix,
    /// The save interval has not elapsed.
    NotDue,
    Committed(LocationFix),
    Failed,
}

#[derive(Debug)]
struct PersistState {
    latest_fix: Option<LocationFix>,
    last_saved_at: Instant,
}

pub struct PeriodicPersister {
    sink: Arc<dyn FixSink>,
    user_id: String,
    schedule: PersistSchedule,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<PersistState>,
}

impl PeriodicPersister {
    /// The first commit is due one save interval after construction.
    pub fn new(
        sink: Arc<dyn FixSink>,
        user_id: impl Into<String>,
        schedule: PersistSchedule,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        let last_saved_at = clock.now();
        Self {
            sink,
            user_id: user_id.into(),
            schedule,
            clock,
            events,
            state: Mutex::new(PersistState {
                latest_fix: None,
                last_saved_at,
            }),
        }
    }

    /// Remember `fix` as the newest reading. No I/O.
    pub fn record(&self, fix: LocationFix) {
        self.lock().latest_fix = Some(fix);
    }

    pub fn latest_fix(&self) -> Option<LocationFix> {
        self.lock().latest_fix
    }

    pub fn schedule(&self) -> PersistSchedule {
        self.schedule
    }

    /// Run one check tick.
    pub async fn check(&self) -> CheckOutcome {
        let now = self.clock.now();
        let fix = {
            let state = self.lock();
            let Some(fix) = state.latest_fix else {
                return CheckOutcome::NoFix;
            };
            if now.saturating_duration_since(state.last_saved_at) < self.schedule.save_interval {
                return CheckOutcome::NotDue;
            }
            fix
        };

        let record = FixRecord::from_fix(&self.user_id, &fix);
        match self.sink.commit(&record).await {
            Ok(()) => {
                self.lock().last_saved_at = now;
                info!(lat = fix.latitude, lon = fix.longitude, "location snapshot saved");
                self.events.emit(Event::FixCommitted {
                    fix,
                    at: self.clock.utc_now(),
                });
                CheckOutcome::Committed(fix)
            }
            Err(err) => {
                warn!(error = %err, "location snapshot not saved, retrying next check");
                self.events.emit(Event::CommitFailed {
                    reason: err.to_string(),
                    at: self.clock.utc_now(),
                });
                CheckOutcome::Failed
            }
        }
    }

    /// Spawn the fix collector and the check timer.
    ///
    /// Both tasks exit once `shutdown` flips to `true` or the fix stream
    /// closes; a commit already in flight is finished first, and no tick
    /// fires afterwards.
    pub fn spawn(
        self: &Arc<Self>,
        fixes: FixStream,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        // Dropped by the collector on exit, which stops the timer.
        let (collecting, collector_done) = watch::channel(());
        let collector =
            tokio::spawn(Arc::clone(self).collect(fixes, shutdown.clone(), collecting));
        let ticker = tokio::spawn(Arc::clone(self).run_checks(shutdown, collector_done));
        vec![collector, ticker]
    }

    async fn collect(
        self: Arc<Self>,
        mut fixes: FixStream,
        mut shutdown: watch::Receiver<bool>,
        _collecting: watch::Sender<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                fix = fixes.next() => match fix {
                    Some(fix) => self.record(fix),
                    None => break,
                },
            }
        }
        debug!("fix collector stopped");
    }

    async fn run_checks(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut collector_done: watch::Receiver<()>,
    ) {
        let period = self.schedule.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = collector_done.changed() => break,
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
        debug!("persistence timer stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PersistState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
