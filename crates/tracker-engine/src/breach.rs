//! Geofence breach detection with grace, cooldown and sustained tracking.
//!
//! Evaluation is synchronous and takes the current time explicitly; the
//! caller supplies the company's active AOs. Elapsed-time checks run on the
//! monotonic clock; wall time only feeds payload timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use tracker_core::entity::{AoSummary, AreaOfOperations, ViolationKind};
use tracker_core::geo::{distance_to_ring_meters, point_in_ring, Point};
use tracker_core::ids::EntityId;
use tracker_settings::BreachSettings;

/// One moment on both clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreachState {
    pub outside_since: Option<Stamp>,
    pub last_alert_at: Option<Instant>,
    pub last_safe_ao: Option<AoSummary>,
    pub last_approach_at: Option<Instant>,
    pub last_sustained_at: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreachPhase {
    Inside,
    OutsideGrace,
    OutsideAlerted,
    OutsideSustained,
}

impl BreachState {
    pub fn phase(&self, now: Instant, settings: &BreachSettings) -> BreachPhase {
        let Some(since) = self.outside_since else {
            return BreachPhase::Inside;
        };
        if now.saturating_duration_since(since.at) < ms(settings.grace_ms) || self.last_alert_at.is_none() {
            BreachPhase::OutsideGrace
        } else if self.last_sustained_at.is_some() {
            BreachPhase::OutsideSustained
        } else {
            BreachPhase::OutsideAlerted
        }
    }
}

/// One violation produced by an evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub kind: ViolationKind,
    pub ao: Option<AoSummary>,
    pub distance_meters: Option<f64>,
    pub breach_since: Option<DateTime<Utc>>,
}

pub struct BreachDetector {
    states: DashMap<EntityId, BreachState>,
    settings: BreachSettings,
}

impl BreachDetector {
    pub fn new(settings: BreachSettings) -> Self {
        Self {
            states: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BreachSettings {
        &self.settings
    }

    /// Advance the entity's breach state for a new position.
    pub fn evaluate(
        &self,
        entity: &EntityId,
        point: Point,
        aos: &[AreaOfOperations],
        now: Stamp,
    ) -> Vec<Detection> {
        let active: Vec<&AreaOfOperations> = aos.iter().filter(|ao| ao.active).collect();
        if active.is_empty() {
            self.clear(entity);
            return Vec::new();
        }

        let s = &self.settings;
        let mut detections = Vec::new();
        let mut state = self.states.entry(entity.clone()).or_default();

        match self.containing(point, &active) {
            Some(ao) => {
                let distance = distance_to_ring_meters(point, &ao.ring);
                if s.approaching_enabled
                    && distance <= s.approaching_meters
                    && cooled(state.last_approach_at, now.at, s.approaching_cooldown_ms)
                {
                    detections.push(Detection {
                        kind: ViolationKind::ApproachingBoundary,
                        ao: Some(ao.summary()),
                        distance_meters: Some(distance),
                        breach_since: None,
                    });
                    state.last_approach_at = Some(now.at);
                }
                state.outside_since = None;
                state.last_safe_ao = Some(ao.summary());
                state.last_sustained_at = None;
            }
            None => {
                let Some(since) = state.outside_since else {
                    state.outside_since = Some(now);
                    debug!(entity_id = %entity, "left all AOs, grace started");
                    return detections;
                };
                let elapsed = now.at.saturating_duration_since(since.at);
                if elapsed < ms(s.grace_ms) || !cooled(state.last_alert_at, now.at, s.cooldown_ms) {
                    return detections;
                }

                let distance = active
                    .iter()
                    .map(|ao| distance_to_ring_meters(point, &ao.ring))
                    .fold(f64::INFINITY, f64::min);
                let distance = distance.is_finite().then_some(distance);

                detections.push(Detection {
                    kind: ViolationKind::Breach,
                    ao: state.last_safe_ao.clone(),
                    distance_meters: distance,
                    breach_since: Some(since.wall),
                });
                state.last_alert_at = Some(now.at);

                if elapsed >= ms(s.sustained_ms) && cooled(state.last_sustained_at, now.at, s.cooldown_ms) {
                    detections.push(Detection {
                        kind: ViolationKind::SustainedBreach,
                        ao: state.last_safe_ao.clone(),
                        distance_meters: distance,
                        breach_since: Some(since.wall),
                    });
                    state.last_sustained_at = Some(now.at);
                }
            }
        }
        detections
    }

    /// Exact containment first; then the tolerance buffer around each ring.
    fn containing<'a>(&self, point: Point, aos: &[&'a AreaOfOperations]) -> Option<&'a AreaOfOperations> {
        aos.iter()
            .find(|ao| point_in_ring(point, &ao.ring))
            .or_else(|| {
                aos.iter()
                    .find(|ao| distance_to_ring_meters(point, &ao.ring) <= self.settings.tolerance_meters)
            })
            .copied()
    }

    pub fn clear(&self, entity: &EntityId) {
        let _ = self.states.remove(entity);
    }

    pub fn state(&self, entity: &EntityId) -> Option<BreachState> {
        self.states.get(entity).map(|s| s.clone())
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn cooled(last: Option<Instant>, now: Instant, cooldown_ms: u64) -> bool {
    last.map_or(true, |t| now.saturating_duration_since(t) >= ms(cooldown_ms))
}

/// The AO that contains `point` exactly, ignoring the tolerance buffer.
pub fn display_ao(point: Point, aos: &[AreaOfOperations]) -> Option<AoSummary> {
    aos.iter()
        .find(|ao| ao.active && point_in_ring(point, &ao.ring))
        .map(AreaOfOperations::summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::square_ao;
    use chrono::TimeZone;

    const METERS_PER_DEGREE: f64 = 111_320.0;

    /// Seconds relative to a fixed origin; negative offsets are allowed down to -60.
    struct Clock {
        origin: Instant,
    }

    impl Clock {
        fn new() -> Self {
            Self { origin: Instant::now() }
        }

        fn t(&self, secs: i64) -> Stamp {
            let offset = Duration::from_secs((secs + 60) as u64);
            let wall_origin = Utc.with_ymd_and_hms(2026, 5, 1, 7, 59, 0).unwrap();
            Stamp {
                at: self.origin + offset,
                wall: wall_origin + chrono::Duration::from_std(offset).unwrap(),
            }
        }
    }

    fn detector() -> BreachDetector {
        BreachDetector::new(BreachSettings {
            approaching_enabled: false,
            ..Default::default()
        })
    }

    fn kinds(d: &[Detection]) -> Vec<ViolationKind> {
        d.iter().map(|d| d.kind).collect()
    }

    // AO spans lng/lat 0..0.01; (0.02, 0.005) is ~1.1 km east of it.
    const INSIDE: Point = Point { lng: 0.005, lat: 0.005 };
    const OUTSIDE: Point = Point { lng: 0.02, lat: 0.005 };

    #[test]
    fn grace_cooldown_and_sustained_timeline() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = detector();
        let e = EntityId::from_raw("e1");
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];

        assert!(d.evaluate(&e, INSIDE, &aos, t(-5)).is_empty());
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(0)).is_empty());
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(5)).is_empty());
        assert_eq!(d.state(&e).unwrap().phase(t(5).at, d.settings()), BreachPhase::OutsideGrace);

        let at_grace = d.evaluate(&e, OUTSIDE, &aos, t(10));
        assert_eq!(kinds(&at_grace), vec![ViolationKind::Breach]);
        assert_eq!(at_grace[0].breach_since, Some(t(0).wall));
        assert_eq!(at_grace[0].ao.as_ref().unwrap().id.as_str(), "a1");
        assert!(at_grace[0].distance_meters.unwrap() > 1_000.0);
        assert_eq!(d.state(&e).unwrap().phase(t(10).at, d.settings()), BreachPhase::OutsideAlerted);

        assert!(d.evaluate(&e, OUTSIDE, &aos, t(30)).is_empty());
        assert_eq!(kinds(&d.evaluate(&e, OUTSIDE, &aos, t(70))), vec![ViolationKind::Breach]);
        // sustained threshold passed but the breach cooldown still runs
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(120)).is_empty());
        assert_eq!(
            kinds(&d.evaluate(&e, OUTSIDE, &aos, t(130))),
            vec![ViolationKind::Breach, ViolationKind::SustainedBreach]
        );
        assert_eq!(d.state(&e).unwrap().phase(t(130).at, d.settings()), BreachPhase::OutsideSustained);
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(150)).is_empty());
    }

    #[test]
    fn returning_inside_resets_tracking() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = detector();
        let e = EntityId::from_raw("e1");
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        d.evaluate(&e, OUTSIDE, &aos, t(0));
        d.evaluate(&e, INSIDE, &aos, t(8));
        // the grace clock restarts
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(12)).is_empty());
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(21)).is_empty());
        assert_eq!(kinds(&d.evaluate(&e, OUTSIDE, &aos, t(22))), vec![ViolationKind::Breach]);
        let state = d.state(&e).unwrap();
        assert_eq!(state.outside_since, Some(t(12)));
    }

    #[test]
    fn tolerance_buffer_counts_as_inside() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = detector();
        let e = EntityId::from_raw("e1");
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        // 10 m east of the east edge
        let just_out = Point::new(0.01 + 10.0 / METERS_PER_DEGREE, 0.005);
        d.evaluate(&e, just_out, &aos, t(0));
        assert!(d.evaluate(&e, just_out, &aos, t(30)).is_empty());
        assert_eq!(d.state(&e).unwrap().outside_since, None);
        assert!(display_ao(just_out, &aos).is_none());
    }

    #[test]
    fn no_active_aos_clears_state() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = detector();
        let e = EntityId::from_raw("e1");
        let mut aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        d.evaluate(&e, OUTSIDE, &aos, t(0));
        assert_eq!(d.tracked(), 1);
        aos[0].active = false;
        assert!(d.evaluate(&e, OUTSIDE, &aos, t(20)).is_empty());
        assert!(d.state(&e).is_none());
    }

    #[test]
    fn approaching_fires_once_per_cooldown_window() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = BreachDetector::new(BreachSettings::default());
        let e = EntityId::from_raw("e1");
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        let near_edge = Point::new(40.0 / METERS_PER_DEGREE, 0.005);

        let first = d.evaluate(&e, near_edge, &aos, t(0));
        assert_eq!(kinds(&first), vec![ViolationKind::ApproachingBoundary]);
        let distance = first[0].distance_meters.unwrap();
        assert!((distance - 40.0).abs() < 1.0, "distance {distance}");

        assert!(d.evaluate(&e, near_edge, &aos, t(10)).is_empty());
        assert!(d.evaluate(&e, near_edge, &aos, t(29)).is_empty());
        assert_eq!(d.evaluate(&e, near_edge, &aos, t(30)).len(), 1);
    }

    #[test]
    fn far_from_edge_never_approaches() {
        let clock = Clock::new();
        let t = |secs| clock.t(secs);
        let d = BreachDetector::new(BreachSettings::default());
        let e = EntityId::from_raw("e1");
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        let inner = Point::new(60.0 / METERS_PER_DEGREE, 0.005);
        for secs in [0, 31, 62] {
            assert!(d.evaluate(&e, inner, &aos, t(secs)).is_empty());
        }
    }

    #[test]
    fn display_membership_is_exact() {
        let aos = vec![square_ao("a1", "c1", 0.0, 0.0, 0.01)];
        assert_eq!(display_ao(INSIDE, &aos).unwrap().id.as_str(), "a1");
        assert!(display_ao(OUTSIDE, &aos).is_none());
    }
}
