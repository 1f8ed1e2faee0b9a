pub mod aggregator;
pub mod live;
pub mod segmenter;
pub mod stationary;
pub mod violations;

use serde::{Deserialize, Serialize};

use crate::geo::heading_deg;
use crate::telemetry::ValidatedPoint;

pub use aggregator::{RideAggregator, RideStatistics, format_duration};
pub use live::{
    Clock, LiveRideTracker, ManualClock, ReplayClock, RideEvent, RideSummary, SystemClock,
};
pub use segmenter::{RideSegmenter, RidesByDate};
pub use stationary::{StationaryFilter, StationaryFilterExt, filter_stationary_points};
pub use violations::{SpeedViolationTracker, speed_violation_trajectory};

/// One continuous movement session of a device.
///
/// A ride always holds at least one point. Its identity is fixed when it is
/// created; later points only ever get appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    id: String,
    device_id: String,
    path: Vec<ValidatedPoint>,
    last_update_ms: i64,
    is_active: bool,
}

impl Ride {
    pub fn new(device_id: &str, first: ValidatedPoint) -> Self {
        Self {
            id: format!("{}-{}", device_id, first.raw_time_ms),
            device_id: device_id.to_string(),
            last_update_ms: first.raw_time_ms,
            path: vec![first],
            is_active: true,
        }
    }

    pub(crate) fn from_path(device_id: &str, path: Vec<ValidatedPoint>) -> Option<Self> {
        let start_ms = path.first()?.raw_time_ms;
        let end_ms = path.last()?.raw_time_ms;
        Some(Self {
            id: format!("{}-{}", device_id, start_ms),
            device_id: device_id.to_string(),
            last_update_ms: end_ms,
            path,
            is_active: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn start(&self) -> &ValidatedPoint {
        &self.path[0]
    }

    pub fn end(&self) -> &ValidatedPoint {
        &self.path[self.path.len() - 1]
    }

    pub fn path(&self) -> &[ValidatedPoint] {
        &self.path
    }

    pub fn last_update_ms(&self) -> i64 {
        self.last_update_ms
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Append a point, deriving its heading from the previous end
    pub(crate) fn push(&mut self, mut point: ValidatedPoint) {
        let end = self.end();
        if point.heading.is_none() && (end.lat != point.lat || end.lng != point.lng) {
            point.heading = Some(heading_deg(end.lat, end.lng, point.lat, point.lng));
        }
        self.last_update_ms = self.last_update_ms.max(point.raw_time_ms);
        self.path.push(point);
    }

    /// Record activity without a usable point
    pub(crate) fn touch(&mut self, time_ms: i64) {
        self.last_update_ms = self.last_update_ms.max(time_ms);
    }

    pub(crate) fn deactivate(&mut self) {
        self.is_active = false;
    }

    pub(crate) fn set_active(&mut self, is_active: bool) {
        self.is_active = is_active;
    }
}
