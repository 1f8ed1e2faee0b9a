use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::aggregator::{RideAggregator, RideStatistics};
use super::violations::SpeedViolationTracker;
use super::Ride;
use crate::config::{FixlessRecordPolicy, PipelineConfig};
use crate::geo::GeoBounds;
use crate::telemetry::{TelemetryRecord, ValidatedPoint};

/// Source of "now" for ride timeouts
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    /// Called with the time of every record the live session processes.
    /// Wall clocks ignore it.
    fn observe(&self, _record_time_ms: i64) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Clock for replaying recorded telemetry: time is the latest record time
/// seen plus the wall time elapsed since it was seen.
#[derive(Debug, Default)]
pub struct ReplayClock {
    anchor: Mutex<Option<(i64, Instant)>>,
}

impl ReplayClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ReplayClock {
    fn now_ms(&self) -> i64 {
        match *self.anchor.lock().unwrap_or_else(|e| e.into_inner()) {
            Some((record_ms, seen_at)) => {
                record_ms + i64::try_from(seen_at.elapsed().as_millis()).unwrap_or(i64::MAX)
            }
            None => Utc::now().timestamp_millis(),
        }
    }

    fn observe(&self, record_time_ms: i64) {
        let mut anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        if anchor.is_none_or(|(latest, _)| record_time_ms >= latest) {
            *anchor = Some((record_time_ms, Instant::now()));
        }
    }
}

/// Snapshot of the live ride handed to the display layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    pub ride_id: String,
    pub device_id: String,
    pub is_active: bool,
    /// Latest position
    pub position: ValidatedPoint,
    pub statistics: RideStatistics,
    /// Points currently in the speed-violation trajectory
    pub violation_points: usize,
}

/// What a single input did to the live ride
#[derive(Clone, Debug, PartialEq)]
pub enum RideEvent {
    /// A new ride object was created. `ended` is the previous ride when it
    /// was still active and this record closed it.
    Started {
        ride_id: String,
        ended: Option<RideSummary>,
    },
    Extended { ride_id: String },
    /// A fixless record refreshed the ride without adding a point
    KeptAlive { ride_id: String },
    TimedOut { ride_id: String },
    Ignored,
    Unchanged,
}

/// Live ride state machine for one device stream.
///
/// `NONE -> ACTIVE` on the first valid record, `ACTIVE -> ACTIVE` while
/// records keep arriving within the timeout, `ACTIVE -> INACTIVE` on a tick
/// past the timeout. An inactive ride is kept for display and a later
/// record starts a fresh one.
#[derive(Debug)]
pub struct LiveRideTracker {
    ride_timeout_ms: i64,
    fixless_policy: FixlessRecordPolicy,
    device_filter: Option<String>,
    bounds: GeoBounds,
    aggregator: RideAggregator,
    violations: SpeedViolationTracker,
    current_ride: Option<Ride>,
}

impl LiveRideTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ride_timeout_ms: config.ride.ride_timeout_ms,
            fixless_policy: config.ride.fixless_policy,
            device_filter: config.ride.device_filter.clone(),
            bounds: config.bounds,
            aggregator: RideAggregator::from_config(config),
            violations: SpeedViolationTracker::from_config(config),
            current_ride: None,
        }
    }

    pub fn on_record(&mut self, record: &TelemetryRecord) -> RideEvent {
        if let Some(device) = &self.device_filter {
            if &record.device_id != device {
                return RideEvent::Ignored;
            }
        }
        let Some(time_ms) = record.time_ms() else {
            debug!("Ignoring live record with timestamp {:?}", record.timestamp);
            return RideEvent::Ignored;
        };

        let timeout = self.ride_timeout_ms;
        let continues = self
            .current_ride
            .as_ref()
            .is_some_and(|ride| ride.is_active() && time_ms - ride.last_update_ms() <= timeout);

        let Some(point) = ValidatedPoint::from_record(record, &self.bounds) else {
            return match (self.fixless_policy, self.current_ride.as_mut()) {
                (FixlessRecordPolicy::KeepAlive, Some(ride)) if continues => {
                    ride.touch(time_ms);
                    RideEvent::KeptAlive {
                        ride_id: ride.id().to_string(),
                    }
                }
                _ => RideEvent::Ignored,
            };
        };

        if continues {
            if let Some(ride) = self.current_ride.as_mut() {
                if point.raw_time_ms < ride.end().raw_time_ms {
                    debug!("Ignoring out of order record {}", point.timestamp);
                    return RideEvent::Ignored;
                }
                self.violations.push(&point);
                ride.push(point);
                return RideEvent::Extended {
                    ride_id: ride.id().to_string(),
                };
            }
        }

        let ended = match &self.current_ride {
            Some(ride) if ride.is_active() => Some(self.summarize(ride)),
            _ => None,
        };
        // The trajectory belongs to one ride
        self.violations.clear();
        self.violations.push(&point);
        let ride = Ride::new(&record.device_id, point);
        info!("Ride {} started", ride.id());
        let ride_id = ride.id().to_string();
        self.current_ride = Some(ride);
        RideEvent::Started { ride_id, ended }
    }

    pub fn on_tick(&mut self, now_ms: i64) -> RideEvent {
        self.violations.prune(now_ms);
        match self.current_ride.as_mut() {
            Some(ride) if ride.is_active() && now_ms - ride.last_update_ms() > self.ride_timeout_ms => {
                ride.deactivate();
                info!("Ride {} timed out", ride.id());
                RideEvent::TimedOut {
                    ride_id: ride.id().to_string(),
                }
            }
            _ => RideEvent::Unchanged,
        }
    }

    /// End the current ride regardless of the timeout, returning its final
    /// summary when it was still active
    pub fn close(&mut self) -> Option<RideSummary> {
        let ride = self.current_ride.as_mut().filter(|ride| ride.is_active())?;
        ride.deactivate();
        let ride = self.current_ride.as_ref()?;
        Some(self.summarize(ride))
    }

    pub fn current_ride(&self) -> Option<&Ride> {
        self.current_ride.as_ref()
    }

    pub fn statistics(&self) -> Option<RideStatistics> {
        self.current_ride
            .as_ref()
            .map(|ride| self.aggregator.statistics(ride))
    }

    pub fn summary(&self) -> Option<RideSummary> {
        self.current_ride
            .as_ref()
            .map(|ride| self.summarize(ride))
    }

    pub fn violations(&self) -> &SpeedViolationTracker {
        &self.violations
    }

    fn summarize(&self, ride: &Ride) -> RideSummary {
        RideSummary {
            ride_id: ride.id().to_string(),
            device_id: ride.device_id().to_string(),
            is_active: ride.is_active(),
            position: ride.end().clone(),
            statistics: self.aggregator.statistics(ride),
            violation_points: self.violations.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::test_support::{base_ms, pending_record, record_at, ts};

    fn moving(offset_ms: i64, step: usize, speed: f64) -> TelemetryRecord {
        record_at(&ts(offset_ms), 6.9271 + step as f64 * 0.001, 79.8612, speed)
    }

    fn started_id(event: RideEvent) -> String {
        match event {
            RideEvent::Started { ride_id, .. } => ride_id,
            other => panic!("expected a started ride, got {:?}", other),
        }
    }

    #[test]
    fn test_tick_past_timeout_deactivates_but_keeps_ride() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        started_id(tracker.on_record(&moving(0, 0, 30.)));

        assert_eq!(tracker.on_tick(base_ms() + 10_000), RideEvent::Unchanged);
        assert!(matches!(
            tracker.on_tick(base_ms() + 10_001),
            RideEvent::TimedOut { .. }
        ));
        let ride = tracker.current_ride().unwrap();
        assert!(!ride.is_active());
        assert_eq!(ride.path().len(), 1);
        // Timing out is reported once
        assert_eq!(tracker.on_tick(base_ms() + 20_000), RideEvent::Unchanged);
    }

    #[test]
    fn test_records_within_timeout_extend() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        let id = started_id(tracker.on_record(&moving(0, 0, 30.)));
        assert_eq!(
            tracker.on_record(&moving(10_000, 1, 30.)),
            RideEvent::Extended { ride_id: id.clone() }
        );
        let stats = tracker.statistics().unwrap();
        assert_eq!(stats.point_count, 2);
        assert_eq!(stats.duration_ms, 10_000);
        assert_eq!(tracker.current_ride().unwrap().id(), id);
    }

    #[test]
    fn test_record_after_timeout_starts_fresh_ride() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        let first = started_id(tracker.on_record(&moving(0, 0, 30.)));
        match tracker.on_record(&moving(10_001, 1, 30.)) {
            RideEvent::Started { ride_id, ended } => {
                assert_ne!(ride_id, first);
                assert_eq!(ended.unwrap().ride_id, first);
            }
            other => panic!("expected a new ride, got {:?}", other),
        }
    }

    #[test]
    fn test_inactive_ride_is_not_resurrected() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        let first = started_id(tracker.on_record(&moving(0, 0, 30.)));
        tracker.on_tick(base_ms() + 10_001);
        // Within the timeout of the last update, but the ride already ended
        match tracker.on_record(&moving(5_000, 1, 30.)) {
            RideEvent::Started { ride_id, ended } => {
                assert_ne!(ride_id, first);
                assert!(ended.is_none());
            }
            other => panic!("expected a new ride, got {:?}", other),
        }
        assert!(tracker.current_ride().unwrap().is_active());
    }

    #[test]
    fn test_fixless_records_under_each_policy() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        assert_eq!(tracker.on_record(&pending_record(&ts(0))), RideEvent::Ignored);
        assert!(tracker.current_ride().is_none());
        tracker.on_record(&moving(0, 0, 30.));
        assert_eq!(tracker.on_record(&pending_record(&ts(5_000))), RideEvent::Ignored);
        assert_eq!(tracker.current_ride().unwrap().last_update_ms(), base_ms());

        let mut config = PipelineConfig::default();
        config.ride.fixless_policy = FixlessRecordPolicy::KeepAlive;
        let mut tracker = LiveRideTracker::new(&config);
        assert_eq!(tracker.on_record(&pending_record(&ts(0))), RideEvent::Ignored);
        tracker.on_record(&moving(0, 0, 30.));
        assert!(matches!(
            tracker.on_record(&pending_record(&ts(8_000))),
            RideEvent::KeptAlive { .. }
        ));
        let ride = tracker.current_ride().unwrap();
        assert_eq!(ride.last_update_ms(), base_ms() + 8_000);
        assert_eq!(ride.path().len(), 1);
        assert_eq!(tracker.on_tick(base_ms() + 15_000), RideEvent::Unchanged);
    }

    #[test]
    fn test_device_filter() {
        let mut config = PipelineConfig::default();
        config.ride.device_filter = Some("ESP12E_002".to_string());
        let mut tracker = LiveRideTracker::new(&config);
        assert_eq!(tracker.on_record(&moving(0, 0, 30.)), RideEvent::Ignored);
        assert!(tracker.current_ride().is_none());
    }

    #[test]
    fn test_violations_fed_from_accepted_points() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        tracker.on_record(&moving(0, 0, 75.));
        tracker.on_record(&moving(1_000, 1, 40.));
        tracker.on_record(&moving(2_000, 2, 82.));
        assert_eq!(tracker.violations().len(), 2);
        assert_eq!(tracker.summary().unwrap().violation_points, 2);
        tracker.on_tick(base_ms() + 2_000 + 5 * 60 * 1000 + 1);
        assert!(tracker.violations().is_empty());
    }

    #[test]
    fn test_violations_do_not_carry_into_next_ride() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        tracker.on_record(&moving(0, 0, 80.));
        tracker.on_record(&moving(1_000, 1, 85.));
        assert_eq!(tracker.summary().unwrap().violation_points, 2);

        let second = started_id(tracker.on_record(&moving(61_000, 2, 20.)));
        tracker.on_record(&moving(62_000, 3, 25.));
        let summary = tracker.summary().unwrap();
        assert_eq!(summary.ride_id, second);
        assert_eq!(summary.statistics.max_speed_kmh, 25.);
        assert_eq!(summary.violation_points, 0);
    }

    #[test]
    fn test_ended_summary_keeps_its_own_violations() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        tracker.on_record(&moving(0, 0, 80.));
        tracker.on_record(&moving(1_000, 1, 85.));
        match tracker.on_record(&moving(12_000, 2, 20.)) {
            RideEvent::Started {
                ended: Some(ended), ..
            } => assert_eq!(ended.violation_points, 2),
            other => panic!("expected the first ride to end, got {:?}", other),
        }
        assert!(tracker.violations().is_empty());
    }

    #[test]
    fn test_close_reports_active_ride_once() {
        let mut tracker = LiveRideTracker::new(&PipelineConfig::default());
        tracker.on_record(&moving(0, 0, 30.));
        tracker.on_record(&moving(1_000, 1, 30.));
        let summary = tracker.close().unwrap();
        assert!(!summary.is_active);
        assert_eq!(summary.statistics.point_count, 2);
        assert!(tracker.close().is_none());
    }

    #[test]
    fn test_manual_and_replay_clocks() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);

        let replay = ReplayClock::new();
        replay.observe(base_ms());
        replay.observe(base_ms() - 60_000);
        let now = replay.now_ms();
        assert!(now >= base_ms() && now < base_ms() + 60_000);
    }
}
