// Speed-violation trajectory: where and when the vehicle went over the limit

use std::collections::VecDeque;

use super::stationary::{StationaryFilterExt, is_stationary};
use crate::config::PipelineConfig;
use crate::telemetry::ValidatedPoint;

/// Points over the speed limit within the last `violation_window_ms` before
/// `now_ms`, with stationary repeats collapsed.
pub fn speed_violation_trajectory(
    points: &[ValidatedPoint],
    config: &PipelineConfig,
    now_ms: i64,
) -> Vec<ValidatedPoint> {
    let threshold = config.incident.speeding_kmh;
    let window_ms = config.aggregation.violation_window_ms;
    points
        .iter()
        .filter(|p| p.speed_kmh > threshold && now_ms - p.raw_time_ms <= window_ms)
        .cloned()
        .filter_stationary(config.stationary.epsilon_deg)
        .collect()
}

/// Incremental version of [`speed_violation_trajectory`] for long running
/// streams. Memory is bounded by the recency window.
#[derive(Clone, Debug)]
pub struct SpeedViolationTracker {
    threshold_kmh: f64,
    epsilon_deg: f64,
    window_ms: i64,
    points: VecDeque<ValidatedPoint>,
}

impl SpeedViolationTracker {
    pub fn new(threshold_kmh: f64, epsilon_deg: f64, window_ms: i64) -> Self {
        Self {
            threshold_kmh,
            epsilon_deg,
            window_ms,
            points: VecDeque::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.incident.speeding_kmh,
            config.stationary.epsilon_deg,
            config.aggregation.violation_window_ms,
        )
    }

    /// Offer a point, returns true when it was added to the trajectory
    pub fn push(&mut self, point: &ValidatedPoint) -> bool {
        if point.speed_kmh <= self.threshold_kmh {
            return false;
        }
        self.prune(point.raw_time_ms);
        if let Some(last) = self.points.back() {
            if is_stationary(last, point, self.epsilon_deg) {
                return false;
            }
        }
        self.points.push_back(point.clone());
        true
    }

    /// Drop points older than the window
    pub fn prune(&mut self, now_ms: i64) {
        while let Some(front) = self.points.front() {
            if now_ms - front.raw_time_ms > self.window_ms {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn trajectory(&self) -> impl Iterator<Item = &ValidatedPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
