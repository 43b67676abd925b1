//! Scripted location provider.
//!
//! Plays back a fixed path at the requested cadence. Used to drive the
//! engine from recorded tracks and in tests; it can also be told to refuse
//! `open` or to drop individual readings.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::fix::LocationFix;
use super::sampler::{LocationProvider, LocationRequest};
use crate::error::SamplerError;
use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl From<Coordinate> for ReplayPoint {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
            accuracy_m: None,
        }
    }
}

/// What happens once the path is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayEnd {
    /// Keep reporting the last point, like a worker standing still.
    #[default]
    Hold,
    /// Stop producing fixes; the session stays open but quiet.
    Finish,
}

#[derive(Debug, Default)]
struct ReplayState {
    interval: Duration,
    attempt: usize,
    cursor: usize,
    open: bool,
    origin: Option<(Instant, DateTime<Utc>)>,
}

pub struct ReplayProvider {
    points: Vec<ReplayPoint>,
    end: ReplayEnd,
    open_error: Option<SamplerError>,
    dropouts: HashSet<usize>,
    terminal_at: Option<(usize, SamplerError)>,
    state: Mutex<ReplayState>,
}

impl ReplayProvider {
    pub fn new(points: Vec<ReplayPoint>) -> Self {
        Self {
            points,
            end: ReplayEnd::default(),
            open_error: None,
            dropouts: HashSet::new(),
            terminal_at: None,
            state: Mutex::new(ReplayState::default()),
        }
    }

    /// A worker who never moves.
    pub fn stationary(at: Coordinate) -> Self {
        Self::new(vec![at.into()])
    }

    pub fn with_end(mut self, end: ReplayEnd) -> Self {
        self.end = end;
        self
    }

    /// Make `open` fail, e.g. with `PermissionDenied`.
    pub fn failing_open(mut self, err: SamplerError) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Acquisition attempts (zero-based) that report `ProviderUnavailable`.
    pub fn with_dropouts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.dropouts.extend(attempts);
        self
    }

    /// Fail permanently on the given acquisition attempt.
    pub fn failing_at(mut self, attempt: usize, err: SamplerError) -> Self {
        self.terminal_at = Some((attempt, err));
        self
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_next(&self) -> Option<Result<LocationFix, SamplerError>> {
        let mut state = self.lock();
        let attempt = state.attempt;
        state.attempt += 1;

        if let Some((at, err)) = &self.terminal_at {
            if *at == attempt {
                return Some(Err(err.clone()));
            }
        }
        if self.dropouts.contains(&attempt) {
            return Some(Err(SamplerError::ProviderUnavailable(format!(
                "no signal on attempt {attempt}"
            ))));
        }

        let point = match self.points.get(state.cursor) {
            Some(point) => *point,
            None => match self.end {
                ReplayEnd::Hold => *self.points.last()?,
                ReplayEnd::Finish => return None,
            },
        };
        state.cursor += 1;

        let (origin, origin_utc) = *state.origin.get_or_insert((Instant::now(), Utc::now()));
        let elapsed = chrono::Duration::from_std(Instant::now() - origin)
            .unwrap_or(chrono::Duration::zero());
        Some(Ok(LocationFix {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy_m: point.accuracy_m,
            captured_at: origin_utc + elapsed,
        }))
    }
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    async fn open(&self, request: &LocationRequest) -> Result<(), SamplerError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        let mut state = self.lock();
        state.interval = request.interval;
        state.open = true;
        Ok(())
    }

    async fn next_fix(&self) -> Result<LocationFix, SamplerError> {
        let interval = self.lock().interval;
        tokio::time::sleep(interval).await;
        match self.take_next() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.lock().open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replays_points_in_order_then_holds() {
        let provider = ReplayProvider::new(vec![
            Coordinate::new(1.0, 1.0).into(),
            Coordinate::new(2.0, 2.0).into(),
        ]);
        provider.open(&LocationRequest::default()).await.unwrap();
        assert_eq!(provider.next_fix().await.unwrap().latitude, 1.0);
        assert_eq!(provider.next_fix().await.unwrap().latitude, 2.0);
        assert_eq!(provider.next_fix().await.unwrap().latitude, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_follow_cadence() {
        let provider = ReplayProvider::stationary(Coordinate::new(0.0, 0.0));
        provider.open(&LocationRequest::balanced()).await.unwrap();
        let a = provider.next_fix().await.unwrap();
        let b = provider.next_fix().await.unwrap();
        assert_eq!((b.captured_at - a.captured_at).num_seconds(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_on_attempt() {
        let provider = ReplayProvider::stationary(Coordinate::new(0.0, 0.0))
            .failing_at(1, SamplerError::ServiceDisabled);
        provider.open(&LocationRequest::default()).await.unwrap();
        assert!(provider.next_fix().await.is_ok());
        assert_eq!(provider.next_fix().await.unwrap_err(), SamplerError::ServiceDisabled);
    }

    #[test]
    fn replay_points_parse_from_json() {
        let points: Vec<ReplayPoint> = serde_json::from_str(
            r#"[{"latitude": 19.07, "longitude": 72.87}, {"latitude": 19.08, "longitude": 72.88, "accuracy_m": 12.5}]"#,
        )
        .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].accuracy_m, None);
        assert_eq!(points[1].accuracy_m, Some(12.5));
    }
}
