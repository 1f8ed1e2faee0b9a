use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use super::Ride;
use super::stationary::filter_stationary_points;
use crate::config::PipelineConfig;
use crate::geo::distance_km;
use crate::telemetry::ValidatedPoint;

/// Derived figures for a ride. Recomputed on demand, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideStatistics {
    pub distance_km: f64,
    /// Mean over points that were moving, stopped samples are left out
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub duration_ms: i64,
    /// Time spent covering [`Self::distance_km`]
    pub moving_time_ms: i64,
    pub start_time: String,
    pub point_count: usize,
}

#[derive(Clone, Debug)]
pub struct RideAggregator {
    epsilon_deg: f64,
    max_segment_km: f64,
}

impl RideAggregator {
    /// `max_segment_km` is the clamp for consecutive points: a pair at least
    /// this far apart is a GPS teleport and does not count toward distance.
    pub fn new(epsilon_deg: f64, max_segment_km: f64) -> Self {
        Self {
            epsilon_deg,
            max_segment_km,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.stationary.epsilon_deg,
            config.aggregation.max_segment_km,
        )
    }

    pub fn statistics(&self, ride: &Ride) -> RideStatistics {
        self.compute(ride.start(), ride.end(), ride.path())
    }

    /// Statistics for a bare point sequence in chronological order, `None`
    /// when there are no points
    pub fn statistics_for_points(&self, points: &[ValidatedPoint]) -> Option<RideStatistics> {
        let start = points.first()?;
        let end = points.last()?;
        Some(self.compute(start, end, points))
    }

    fn compute(
        &self,
        start: &ValidatedPoint,
        end: &ValidatedPoint,
        points: &[ValidatedPoint],
    ) -> RideStatistics {
        let filtered = filter_stationary_points(points, self.epsilon_deg);

        let mut distance = 0.;
        let mut moving_time_ms = 0;
        let mut clamped_segments = 0;
        for (a, b) in filtered.iter().tuple_windows() {
            let segment = distance_km(a.lat, a.lng, b.lat, b.lng);
            if segment >= self.max_segment_km {
                clamped_segments += 1;
                continue;
            }
            if segment > 0. {
                distance += segment;
                moving_time_ms += (b.raw_time_ms - a.raw_time_ms).max(0);
            }
        }
        if clamped_segments > 0 {
            debug!(
                "Skipped {} segments of at least {} km between {} and {}",
                clamped_segments, self.max_segment_km, start.timestamp, end.timestamp
            );
        }

        let moving_speeds = points
            .iter()
            .map(|p| p.speed_kmh)
            .filter(|speed| *speed > 0.)
            .collect_vec();
        let (avg_speed_kmh, max_speed_kmh) = if moving_speeds.is_empty() {
            (0., 0.)
        } else {
            (
                moving_speeds.iter().sum::<f64>() / moving_speeds.len() as f64,
                moving_speeds.iter().copied().fold(f64::MIN, f64::max),
            )
        };

        RideStatistics {
            distance_km: distance,
            avg_speed_kmh,
            max_speed_kmh,
            duration_ms: end.raw_time_ms - start.raw_time_ms,
            moving_time_ms,
            start_time: start.timestamp.clone(),
            point_count: points.len(),
        }
    }
}

impl Default for RideAggregator {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Render a duration as `HH:MM:SS`. Hours are not wrapped at a day.
pub fn format_duration(duration_ms: i64) -> String {
    let total_s = duration_ms.max(0) / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total_s / 3600,
        (total_s % 3600) / 60,
        total_s % 60
    )
}
