use std::collections::BTreeMap;

use chrono::DateTime;
use itertools::Itertools;
use log::{debug, info};

use super::Ride;
use super::stationary::filter_stationary_points;
use crate::config::{FixlessRecordPolicy, PipelineConfig};
use crate::geo::GeoBounds;
use crate::telemetry::{TelemetryRecord, TelemetrySnapshot, ValidatedPoint, snapshot_records};

/// Rides grouped by the UTC date (`YYYY-MM-DD`) of their first point
pub type RidesByDate = BTreeMap<String, Vec<Ride>>;

/// Splits a recorded telemetry history into rides.
#[derive(Clone, Debug)]
pub struct RideSegmenter {
    gap_threshold_ms: i64,
    recency_window_ms: i64,
    epsilon_deg: f64,
    fixless_policy: FixlessRecordPolicy,
    bounds: GeoBounds,
}

/// Ride under construction during the walk
struct OpenRide {
    device_id: String,
    path: Vec<ValidatedPoint>,
    last_seen_ms: i64,
}

impl RideSegmenter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            gap_threshold_ms: config.ride.gap_threshold_ms,
            recency_window_ms: config.ride.recency_window_ms,
            epsilon_deg: config.stationary.epsilon_deg,
            fixless_policy: config.ride.fixless_policy,
            bounds: config.bounds,
        }
    }

    pub fn segment(&self, snapshot: &TelemetrySnapshot, now_ms: i64) -> RidesByDate {
        self.segment_records(snapshot_records(snapshot), now_ms)
    }

    /// Segment records in any order. Records from different devices never
    /// share a ride.
    pub fn segment_records<I>(&self, records: I, now_ms: i64) -> RidesByDate
    where
        I: IntoIterator<Item = TelemetryRecord>,
    {
        let oldest_ms = now_ms.saturating_sub(self.recency_window_ms);
        let mut unparsable = 0;
        let mut stale = 0;
        let timed = records
            .into_iter()
            .filter_map(|record| match record.time_ms() {
                Some(time_ms) => Some((time_ms, record)),
                None => {
                    debug!("Skipping record with unparsable timestamp {:?}", record.timestamp);
                    unparsable += 1;
                    None
                }
            })
            .filter(|(time_ms, _)| {
                let recent = *time_ms >= oldest_ms;
                if !recent {
                    stale += 1;
                }
                recent
            })
            .sorted_by_key(|(time_ms, _)| *time_ms)
            .collect_vec();

        let by_device = timed
            .into_iter()
            .into_group_map_by(|(_, record)| record.device_id.clone());

        let mut rides = Vec::new();
        for (device_id, records) in by_device {
            rides.extend(self.walk(&device_id, records));
        }
        rides.sort_by(|a, b| {
            (a.start().raw_time_ms, a.device_id()).cmp(&(b.start().raw_time_ms, b.device_id()))
        });

        let mut by_date = RidesByDate::new();
        for mut ride in rides {
            ride.set_active(now_ms - ride.last_update_ms() <= self.gap_threshold_ms);
            by_date
                .entry(utc_date(ride.start().raw_time_ms))
                .or_default()
                .push(ride);
        }

        info!(
            "Segmented {} rides on {} days ({} unparsable, {} outside the recency window)",
            by_date.values().map(Vec::len).sum::<usize>(),
            by_date.len(),
            unparsable,
            stale
        );
        by_date
    }

    /// Walk one device's records in time order
    fn walk(&self, device_id: &str, records: Vec<(i64, TelemetryRecord)>) -> Vec<Ride> {
        let mut rides = Vec::new();
        let mut open: Option<OpenRide> = None;

        for (time_ms, record) in records {
            let within_gap = open
                .as_ref()
                .is_some_and(|ride| time_ms - ride.last_seen_ms <= self.gap_threshold_ms);

            match ValidatedPoint::from_record(&record, &self.bounds) {
                Some(point) => {
                    if !within_gap {
                        if let Some(finished) = open.take() {
                            rides.extend(self.close(finished));
                        }
                    }
                    match open.as_mut() {
                        Some(ride) => {
                            ride.path.push(point);
                            ride.last_seen_ms = time_ms;
                        }
                        None => {
                            open = Some(OpenRide {
                                device_id: device_id.to_string(),
                                path: vec![point],
                                last_seen_ms: time_ms,
                            })
                        }
                    }
                }
                None => {
                    if self.fixless_policy == FixlessRecordPolicy::KeepAlive && within_gap {
                        if let Some(ride) = open.as_mut() {
                            ride.last_seen_ms = time_ms;
                        }
                    }
                }
            }
        }
        if let Some(finished) = open {
            rides.extend(self.close(finished));
        }
        rides
    }

    fn close(&self, open: OpenRide) -> Option<Ride> {
        let mut points = filter_stationary_points(&open.path, self.epsilon_deg).into_iter();
        let first = points.next()?;
        let mut ride = Ride::new(&open.device_id, first);
        for point in points {
            ride.push(point);
        }
        if ride.path().len() < 2 {
            debug!("Discarding ride {} without movement", ride.id());
            return None;
        }
        ride.touch(open.last_seen_ms);
        Some(ride)
    }
}

impl Default for RideSegmenter {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

fn utc_date(time_ms: i64) -> String {
    DateTime::from_timestamp_millis(time_ms)
        .map(|time| time.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
