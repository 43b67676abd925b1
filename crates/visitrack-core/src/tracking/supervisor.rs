//! Supervised tracking session.
//!
//! One session is one task tree:
//!
//! ```text
//! TrackingSupervisor
//! ├── sampler acquisition task      (LocationSampler)
//! ├── fix collector + check timer   (PeriodicPersister)
//! ├── proximity watcher             (ProximityEngine + ClientRegistry)
//! └── session monitor
//! ```
//!
//! All children observe the same shutdown signal. `stop()` flips it and
//! joins every task before returning, so nothing is written afterwards.
//! When the sampler ends on its own the fix stream closes, every child
//! exits, and the monitor tears the session down and publishes the stopped
//! status. `is_running` is only ever published from a check of the live
//! tasks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::persister::{PeriodicPersister, PersistSchedule};
use super::{FixSink, NullStatusSink, StatusSink};
use crate::clock::{Clock, SystemClock};
use crate::error::SamplerError;
use crate::events::{Event, EventBus};
use crate::location::{FixStream, LocationProvider, LocationRequest, LocationSampler};
use crate::proximity::{ProximityEngine, ProximitySettings};
use crate::registry::ClientRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub is_running: bool,
    pub last_verified_at: DateTime<Utc>,
    /// Terminal sampler error that ended the last session, if any.
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingOptions {
    pub user_id: String,
    pub request: LocationRequest,
    pub schedule: PersistSchedule,
    pub proximity: ProximitySettings,
}

impl TrackingOptions {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            request: LocationRequest::default(),
            schedule: PersistSchedule::default(),
            proximity: ProximitySettings::default(),
        }
    }
}

struct TrackingSession {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    /// Kept apart from `tasks`: the monitor ends sessions itself and must
    /// not join its own handle.
    monitor: JoinHandle<()>,
    persister: Arc<PeriodicPersister>,
}

impl TrackingSession {
    fn tasks_alive(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished()) && !self.monitor.is_finished()
    }
}

type SessionSlot = Arc<Mutex<Option<TrackingSession>>>;

pub struct TrackingSupervisor {
    sampler: Arc<LocationSampler>,
    fix_sink: Arc<dyn FixSink>,
    registry: Arc<dyn ClientRegistry>,
    proximity: Arc<ProximityEngine>,
    status_sink: Arc<dyn StatusSink>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    session: SessionSlot,
    status: Arc<watch::Sender<TrackingStatus>>,
}

impl TrackingSupervisor {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        fix_sink: Arc<dyn FixSink>,
        registry: Arc<dyn ClientRegistry>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (status, _) = watch::channel(TrackingStatus {
            is_running: false,
            last_verified_at: clock.utc_now(),
            last_error: None,
        });
        Self {
            sampler: Arc::new(LocationSampler::new(provider)),
            fix_sink,
            registry,
            proximity: Arc::new(ProximityEngine::new()),
            status_sink: Arc::new(NullStatusSink),
            events: EventBus::default(),
            clock,
            session: Arc::new(Mutex::new(None)),
            status: Arc::new(status),
        }
    }

    pub fn with_proximity(mut self, proximity: Arc<ProximityEngine>) -> Self {
        self.proximity = proximity;
        self
    }

    pub fn with_status_sink(mut self, status_sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = status_sink;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn proximity(&self) -> &Arc<ProximityEngine> {
        &self.proximity
    }

    /// Observe verified status changes.
    pub fn status(&self) -> watch::Receiver<TrackingStatus> {
        self.status.subscribe()
    }

    /// Last published status, without re-verifying.
    pub fn last_status(&self) -> TrackingStatus {
        self.status.borrow().clone()
    }

    /// Start a tracking session.
    ///
    /// Calling this while a healthy session runs leaves it untouched.
    /// Terminal sampler errors are returned and tracking stays stopped.
    pub async fn start(&self, options: TrackingOptions) -> Result<TrackingStatus, SamplerError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.tasks_alive() && self.sampler.is_running().await {
                debug!("tracking already running");
                return Ok(self.publish_verified(&session).await);
            }
        }
        if let Some(stale) = session.take() {
            self.teardown(stale).await;
        }

        let stream = match self.sampler.start(options.request).await {
            Ok(stream) => stream,
            Err(err) => {
                self.events.emit(Event::SamplerFailed {
                    reason: err.to_string(),
                    at: self.clock.utc_now(),
                });
                self.publish_verified(&session).await;
                return Err(err);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let persister = Arc::new(PeriodicPersister::new(
            Arc::clone(&self.fix_sink),
            options.user_id.clone(),
            options.schedule,
            Arc::clone(&self.clock),
            self.events.clone(),
        ));
        let mut tasks = persister.spawn(stream.clone(), shutdown_rx.clone());
        tasks.push(tokio::spawn(watch_proximity(
            stream.clone(),
            shutdown_rx.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.proximity),
            options.proximity,
            Arc::clone(&self.status_sink),
            self.events.clone(),
            Arc::clone(&self.clock),
        )));

        let monitor = tokio::spawn(monitor_session(
            stream,
            shutdown_rx,
            Arc::clone(&self.session),
            Arc::clone(&self.sampler),
            Arc::clone(&self.status),
            self.events.clone(),
            Arc::clone(&self.clock),
        ));

        *session = Some(TrackingSession {
            shutdown: shutdown_tx,
            tasks,
            monitor,
            persister,
        });
        info!(user_id = %options.user_id, "tracking started");
        self.events.emit(Event::TrackingStarted {
            interval_ms: options.request.interval.as_millis() as u64,
            at: self.clock.utc_now(),
        });
        Ok(self.publish_verified(&session).await)
    }

    /// Stop the session. Safe to call repeatedly and from any state.
    pub async fn stop(&self) -> TrackingStatus {
        let mut session = self.session.lock().await;
        if let Some(current) = session.take() {
            self.teardown(current).await;
            info!("tracking stopped");
            self.events.emit(Event::TrackingStopped {
                at: self.clock.utc_now(),
            });
        }
        self.publish_verified(&session).await
    }

    pub async fn restart(&self, options: TrackingOptions) -> Result<TrackingStatus, SamplerError> {
        self.stop().await;
        self.start(options).await
    }

    /// Re-derive `is_running` from the live tasks.
    ///
    /// A session whose sampler died on its own (permission revoked,
    /// location switched off) and that the monitor has not reaped yet is
    /// torn down here and reported as stopped.
    pub async fn refresh_status(&self) -> TrackingStatus {
        let mut session = self.session.lock().await;
        let healthy = match session.as_ref() {
            Some(current) => current.tasks_alive() && self.sampler.is_running().await,
            None => true,
        };
        if !healthy {
            if let Some(dead) = session.take() {
                self.teardown(dead).await;
                report_failure(&self.sampler, &self.events, self.clock.as_ref());
            }
        }
        self.publish_verified(&session).await
    }

    /// Newest fix seen by the running session.
    pub async fn latest_fix(&self) -> Option<crate::location::LocationFix> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.persister.latest_fix())
    }

    async fn teardown(&self, session: TrackingSession) {
        let monitor = session.monitor;
        shut_down(&self.sampler, &session.shutdown, session.tasks).await;
        join(monitor).await;
    }

    /// Derive and publish status. Callers hold the session lock.
    async fn publish_verified(&self, session: &Option<TrackingSession>) -> TrackingStatus {
        let is_running = match session {
            Some(current) => current.tasks_alive() && self.sampler.is_running().await,
            None => false,
        };
        publish(&self.status, &self.sampler, self.clock.as_ref(), is_running)
    }
}

async fn shut_down(
    sampler: &LocationSampler,
    shutdown: &watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
) {
    shutdown.send_replace(true);
    sampler.stop().await;
    for task in tasks {
        join(task).await;
    }
}

async fn join(task: JoinHandle<()>) {
    if let Err(err) = task.await {
        error!(error = %err, "tracking task panicked");
    }
}

fn publish(
    status: &watch::Sender<TrackingStatus>,
    sampler: &LocationSampler,
    clock: &dyn Clock,
    is_running: bool,
) -> TrackingStatus {
    let current = TrackingStatus {
        is_running,
        last_verified_at: clock.utc_now(),
        last_error: sampler.last_error().map(|e| e.to_string()),
    };
    status.send_replace(current.clone());
    current
}

fn report_failure(sampler: &LocationSampler, events: &EventBus, clock: &dyn Clock) {
    let reason = sampler
        .last_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "tracking task exited".to_string());
    error!(%reason, "tracking session ended unexpectedly");
    events.emit(Event::SamplerFailed {
        reason,
        at: clock.utc_now(),
    });
}

/// Waits for the fix stream to close without a shutdown request, then
/// ends the session in place of the supervisor.
///
/// A teardown in progress holds the session lock and flips `shutdown`
/// first, so the monitor backs off instead of contending for the lock.
async fn monitor_session(
    mut fixes: FixStream,
    mut shutdown: watch::Receiver<bool>,
    slot: SessionSlot,
    sampler: Arc<LocationSampler>,
    status: Arc<watch::Sender<TrackingStatus>>,
    events: EventBus,
    clock: Arc<dyn Clock>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            fix = fixes.next() => {
                if fix.is_none() {
                    break;
                }
            }
        }
    }

    let mut session = tokio::select! {
        biased;
        _ = shutdown.changed() => return,
        guard = slot.lock() => guard,
    };
    if *shutdown.borrow() {
        return;
    }
    let Some(ended) = session.take() else {
        return;
    };
    // Dropping our own handle detaches it; the other children have exited.
    drop(ended.monitor);
    shut_down(&sampler, &ended.shutdown, ended.tasks).await;
    report_failure(&sampler, &events, clock.as_ref());
    publish(&status, &sampler, clock.as_ref(), false);
}

#[allow(clippy::too_many_arguments)]
async fn watch_proximity(
    mut fixes: FixStream,
    mut shutdown: watch::Receiver<bool>,
    registry: Arc<dyn ClientRegistry>,
    engine: Arc<ProximityEngine>,
    settings: ProximitySettings,
    status_sink: Arc<dyn StatusSink>,
    events: EventBus,
    clock: Arc<dyn Clock>,
) {
    loop {
        let fix = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            fix = fixes.next() => match fix {
                Some(fix) => fix,
                None => break,
            },
        };
        status_sink.publish(&fix.status_text());

        let entities = match registry.trackable_entities().await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(error = %err, "client registry unavailable, skipping proximity check");
                continue;
            }
        };
        for entry in engine.scan(&fix, &entities, settings) {
            info!(
                entity_id = %entry.entity_id,
                distance_m = entry.distance_m,
                "client in proximity"
            );
            events.emit(Event::ProximityEntered {
                entity_id: entry.entity_id,
                distance_m: entry.distance_m,
                fix: entry.fix,
                at: clock.utc_now(),
            });
        }
    }
    debug!("proximity watcher stopped");
}
