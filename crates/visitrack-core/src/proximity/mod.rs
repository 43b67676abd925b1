//! Per-client proximity detection with cooldown.
//!
//! The engine keeps one [`ProximityState`] per entity id and turns a stream
//! of fixes into discrete "entered proximity" reports. State is overwritten
//! on every evaluation, in range or not, so a fix that flickers across the
//! radius inside the cooldown window cannot report a second entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::geo::{distance_meters, Coordinate};
use crate::location::LocationFix;

pub const DEFAULT_RADIUS_M: f64 = 100.0;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// A client location supplied by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackableEntity {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl TrackableEntity {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityState {
    pub entity_id: String,
    pub was_in_proximity: bool,
    pub last_transition_at: Instant,
}

/// Radius and cooldown used for one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximitySettings {
    pub radius_m: f64,
    pub cooldown: Duration,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_RADIUS_M,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// A reported entry into an entity's radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityEntry {
    pub entity_id: String,
    pub distance_m: f64,
    pub fix: LocationFix,
}

pub struct ProximityEngine {
    states: Mutex<HashMap<String, ProximityState>>,
    clock: Arc<dyn Clock>,
}

impl ProximityEngine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Evaluate one fix against one entity.
    ///
    /// Returns `true` exactly when a new proximity entry should be reported.
    /// The first in-range sighting of an entity always counts.
    pub fn evaluate(
        &self,
        fix: &LocationFix,
        entity: &TrackableEntity,
        radius_m: f64,
        cooldown: Duration,
    ) -> bool {
        let distance = distance_meters(fix.coordinate(), entity.coordinate());
        self.evaluate_at_distance(&entity.id, distance, radius_m, cooldown)
    }

    fn evaluate_at_distance(
        &self,
        entity_id: &str,
        distance_m: f64,
        radius_m: f64,
        cooldown: Duration,
    ) -> bool {
        let in_range = distance_m <= radius_m;
        let now = self.clock.now();

        let mut states = self.lock();
        let is_new_entry = match states.get(entity_id) {
            None => in_range,
            Some(prev) => {
                in_range
                    && !prev.was_in_proximity
                    && now.saturating_duration_since(prev.last_transition_at) > cooldown
            }
        };
        states.insert(
            entity_id.to_string(),
            ProximityState {
                entity_id: entity_id.to_string(),
                was_in_proximity: in_range,
                last_transition_at: now,
            },
        );
        drop(states);

        if is_new_entry {
            debug!(entity_id, distance_m, "entered proximity");
        }
        is_new_entry
    }

    /// Evaluate a fix against every entity and collect the new entries.
    pub fn scan(
        &self,
        fix: &LocationFix,
        entities: &[TrackableEntity],
        settings: ProximitySettings,
    ) -> Vec<ProximityEntry> {
        entities
            .iter()
            .filter_map(|entity| {
                let distance_m = distance_meters(fix.coordinate(), entity.coordinate());
                self.evaluate_at_distance(&entity.id, distance_m, settings.radius_m, settings.cooldown)
                    .then(|| ProximityEntry {
                        entity_id: entity.id.clone(),
                        distance_m,
                        fix: *fix,
                    })
            })
            .collect()
    }

    /// Entities within `radius_m` of the fix. Does not touch state.
    pub fn find_all<'a>(
        &self,
        fix: &LocationFix,
        entities: &'a [TrackableEntity],
        radius_m: f64,
    ) -> Vec<&'a TrackableEntity> {
        entities
            .iter()
            .filter(|e| distance_meters(fix.coordinate(), e.coordinate()) <= radius_m)
            .collect()
    }

    /// Closest entity and its distance, or `None` for an empty list.
    pub fn nearest<'a>(
        &self,
        fix: &LocationFix,
        entities: &'a [TrackableEntity],
    ) -> Option<(&'a TrackableEntity, f64)> {
        entities
            .iter()
            .map(|e| (e, distance_meters(fix.coordinate(), e.coordinate())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Forget one entity so its next in-range fix reports an entry.
    pub fn reset(&self, entity_id: &str) {
        self.lock().remove(entity_id);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    pub fn state(&self, entity_id: &str) -> Option<ProximityState> {
        self.lock().get(entity_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProximityState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProximityEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::EARTH_RADIUS_M;
    use chrono::Utc;

    const CLIENT_LAT: f64 = 19.0760;
    const CLIENT_LON: f64 = 72.8777;

    fn client() -> TrackableEntity {
        TrackableEntity::new("client-1", CLIENT_LAT, CLIENT_LON)
    }

    /// A fix `meters` due north of the client.
    fn fix_north(meters: f64) -> LocationFix {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        LocationFix::new(CLIENT_LAT + dlat, CLIENT_LON, Utc::now())
    }

    fn engine() -> (Arc<ManualClock>, ProximityEngine) {
        let clock = Arc::new(ManualClock::new());
        let engine = ProximityEngine::with_clock(clock.clone());
        (clock, engine)
    }

    #[test]
    fn first_sighting_in_range_is_an_entry() {
        let (_, engine) = engine();
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn first_sighting_out_of_range_is_not() {
        let (_, engine) = engine();
        assert!(!engine.evaluate(&fix_north(150.0), &client(), 100.0, DEFAULT_COOLDOWN));
        let state = engine.state("client-1").unwrap();
        assert!(!state.was_in_proximity);
    }

    #[test]
    fn staying_in_range_reports_once() {
        let (clock, engine) = engine();
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(10));
        assert!(!engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn flicker_inside_cooldown_is_suppressed() {
        let (clock, engine) = engine();
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(60));
        assert!(!engine.evaluate(&fix_north(250.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(60));
        assert!(!engine.evaluate(&fix_north(40.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn returning_after_cooldown_reports_again() {
        let (clock, engine) = engine();
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(3 * 60));
        assert!(!engine.evaluate(&fix_north(400.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(6 * 60));
        assert!(engine.evaluate(&fix_north(30.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let (clock, engine) = engine();
        engine.evaluate(&fix_north(500.0), &client(), 100.0, DEFAULT_COOLDOWN);
        clock.advance(DEFAULT_COOLDOWN);
        assert!(!engine.evaluate(&fix_north(10.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn reset_rearms_immediately() {
        let (clock, engine) = engine();
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
        clock.advance(Duration::from_secs(5));
        engine.reset("client-1");
        assert!(engine.state("client-1").is_none());
        assert!(engine.evaluate(&fix_north(50.0), &client(), 100.0, DEFAULT_COOLDOWN));
    }

    #[test]
    fn reset_all_clears_every_entity() {
        let (_, engine) = engine();
        let other = TrackableEntity::new("client-2", CLIENT_LAT, CLIENT_LON);
        engine.evaluate(&fix_north(10.0), &client(), 100.0, DEFAULT_COOLDOWN);
        engine.evaluate(&fix_north(10.0), &other, 100.0, DEFAULT_COOLDOWN);
        engine.reset_all();
        assert!(engine.state("client-1").is_none());
        assert!(engine.state("client-2").is_none());
    }

    #[test]
    fn states_are_independent_per_entity() {
        let (_, engine) = engine();
        let far = TrackableEntity::new("far", CLIENT_LAT + 1.0, CLIENT_LON);
        let entries = engine.scan(
            &fix_north(20.0),
            &[client(), far],
            ProximitySettings::default(),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, "client-1");
        assert!(entries[0].distance_m < 25.0);
        assert!(!engine.state("far").unwrap().was_in_proximity);
    }

    #[test]
    fn find_all_and_nearest_do_not_mutate() {
        let (_, engine) = engine();
        let entities = vec![
            TrackableEntity::new("a", CLIENT_LAT, CLIENT_LON),
            TrackableEntity::new("b", CLIENT_LAT + 0.0005, CLIENT_LON),
            TrackableEntity::new("c", CLIENT_LAT + 0.01, CLIENT_LON),
        ];
        let fix = fix_north(0.0);
        let inside = engine.find_all(&fix, &entities, 100.0);
        assert_eq!(inside.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let (nearest, d) = engine.nearest(&fix, &entities).unwrap();
        assert_eq!(nearest.id, "a");
        assert_eq!(d, 0.0);
        assert!(engine.state("a").is_none());
    }

    #[test]
    fn nearest_of_empty_list_is_none() {
        let (_, engine) = engine();
        assert!(engine.nearest(&fix_north(0.0), &[]).is_none());
    }
}
