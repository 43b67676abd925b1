//! Background location sampling.
//!
//! The sampler owns one acquisition task per session. Fixes are published
//! through a `watch` channel: the channel only ever holds the newest fix,
//! so a slow consumer skips stale readings instead of stalling the loop,
//! and it can never observe an older fix after a newer one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::fix::LocationFix;
use crate::error::SamplerError;

/// Accuracy/power trade-off requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    HighAccuracy,
    Balanced,
    LowPower,
}

impl Priority {
    /// Cadence used when the caller does not pick one.
    pub fn default_interval(self) -> Duration {
        match self {
            Priority::HighAccuracy => Duration::from_secs(1),
            Priority::Balanced => Duration::from_secs(5),
            Priority::LowPower => Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub priority: Priority,
}

impl LocationRequest {
    pub fn new(interval: Duration, priority: Priority) -> Self {
        Self { interval, priority }
    }

    pub fn from_priority(priority: Priority) -> Self {
        Self::new(priority.default_interval(), priority)
    }

    pub fn high_accuracy() -> Self {
        Self::from_priority(Priority::HighAccuracy)
    }

    pub fn balanced() -> Self {
        Self::from_priority(Priority::Balanced)
    }

    pub fn low_power() -> Self {
        Self::from_priority(Priority::LowPower)
    }
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::high_accuracy()
    }
}

/// Platform location source.
///
/// `open` must fail with a terminal error when permission is missing or
/// location services are off. `next_fix` waits for the next reading;
/// a `ProviderUnavailable` error there is treated as a dropped sample.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn open(&self, request: &LocationRequest) -> Result<(), SamplerError>;

    async fn next_fix(&self) -> Result<LocationFix, SamplerError>;

    /// Release the underlying subscription. Called once per successful `open`.
    async fn close(&self);
}

/// Receiving side of a sampling session.
///
/// Cloning yields an independent observer of the same session.
#[derive(Debug, Clone)]
pub struct FixStream {
    rx: watch::Receiver<Option<LocationFix>>,
}

impl FixStream {
    /// Wait for a fix newer than the last one returned.
    ///
    /// Returns `None` once the session has stopped and every published fix
    /// has been observed.
    pub async fn next(&mut self) -> Option<LocationFix> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(fix) = *self.rx.borrow_and_update() {
                return Some(fix);
            }
        }
    }

    /// Newest fix published so far, without consuming it.
    pub fn latest(&self) -> Option<LocationFix> {
        *self.rx.borrow()
    }
}

struct SamplerSession {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stream: FixStream,
}

pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    session: Mutex<Option<SamplerSession>>,
    last_error: Arc<std::sync::Mutex<Option<SamplerError>>>,
}

impl LocationSampler {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            provider,
            session: Mutex::new(None),
            last_error: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Open the provider and begin acquiring fixes.
    ///
    /// Returns only after the provider accepted the request. Terminal
    /// provider errors are returned here and nothing is spawned.
    pub async fn start(&self, request: LocationRequest) -> Result<FixStream, SamplerError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if !current.task.is_finished() {
                return Err(SamplerError::AlreadyRunning);
            }
        }
        // A previous session that died on its own is reaped here.
        if let Some(stale) = session.take() {
            let _ = stale.task.await;
        }

        if let Err(err) = self.provider.open(&request).await {
            warn!(error = %err, "location provider refused request");
            self.set_last_error(Some(err.clone()));
            return Err(err);
        }
        self.set_last_error(None);

        let (fix_tx, fix_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acquire(
            Arc::clone(&self.provider),
            request,
            fix_tx,
            shutdown_rx,
            Arc::clone(&self.last_error),
        ));
        info!(
            interval_ms = request.interval.as_millis() as u64,
            priority = ?request.priority,
            "location sampling started"
        );

        let stream = FixStream { rx: fix_rx };
        *session = Some(SamplerSession {
            shutdown: shutdown_tx,
            task,
            stream: stream.clone(),
        });
        Ok(stream)
    }

    /// Stop acquisition and release the provider. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        let _ = session.shutdown.send(true);
        if let Err(err) = session.task.await {
            error!(error = %err, "location acquisition task panicked");
        }
        info!("location sampling stopped");
    }

    /// Whether the acquisition task is alive right now.
    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Another observer of the running session, if any.
    pub async fn subscribe(&self) -> Option<FixStream> {
        self.session.lock().await.as_ref().map(|s| s.stream.clone())
    }

    /// Terminal error that ended the most recent session.
    pub fn last_error(&self) -> Option<SamplerError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_error(&self, err: Option<SamplerError>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = err;
    }
}

async fn acquire(
    provider: Arc<dyn LocationProvider>,
    request: LocationRequest,
    fixes: watch::Sender<Option<LocationFix>>,
    mut shutdown: watch::Receiver<bool>,
    last_error: Arc<std::sync::Mutex<Option<SamplerError>>>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = provider.next_fix() => next,
        };
        match next {
            Ok(fix) => {
                debug!(lat = fix.latitude, lon = fix.longitude, "fix acquired");
                fixes.send_replace(Some(fix));
            }
            Err(err) if err.is_terminal() => {
                error!(error = %err, "location sampling ended");
                *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
                break;
            }
            Err(err) => {
                warn!(error = %err, "fix acquisition failed, waiting for next reading");
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(request.interval) => {}
                }
            }
        }
    }
    provider.close().await;
}
