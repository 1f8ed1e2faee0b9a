use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::RidewatchError;
use crate::geo::GeoBounds;
use crate::incident::IncidentThresholds;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "ridewatch";

/// Gap between two samples that splits a batch history into separate rides
pub const DEFAULT_GAP_THRESHOLD_MS: i64 = 15_000;
/// Silence after which the live ride is considered over
pub const DEFAULT_RIDE_TIMEOUT_MS: i64 = 10_000;
/// Only the last 48 hours of history are segmented
pub const DEFAULT_RECENCY_WINDOW_MS: i64 = 48 * 60 * 60 * 1000;
/// ~11 m at the equator
pub const DEFAULT_STATIONARY_EPSILON_DEG: f64 = 0.0001;
/// Consecutive samples further apart than this are GPS teleports
pub const DEFAULT_MAX_SEGMENT_KM: f64 = 1.0;
pub const DEFAULT_VIOLATION_WINDOW_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// What to do with records that have no usable GPS fix when building rides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixlessRecordPolicy {
    /// Drop them before segmentation, they neither extend nor split rides
    #[default]
    Ignore,
    /// Let them refresh the continuity of an existing ride without adding a
    /// path point. They never start a ride.
    KeepAlive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RideConfig {
    pub gap_threshold_ms: i64,
    pub ride_timeout_ms: i64,
    pub recency_window_ms: i64,
    pub fixless_policy: FixlessRecordPolicy,
    /// Only follow this device in the live tracker, `None` follows any
    pub device_filter: Option<String>,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            gap_threshold_ms: DEFAULT_GAP_THRESHOLD_MS,
            ride_timeout_ms: DEFAULT_RIDE_TIMEOUT_MS,
            recency_window_ms: DEFAULT_RECENCY_WINDOW_MS,
            fixless_policy: FixlessRecordPolicy::default(),
            device_filter: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationaryConfig {
    pub epsilon_deg: f64,
}

impl Default for StationaryConfig {
    fn default() -> Self {
        Self {
            epsilon_deg: DEFAULT_STATIONARY_EPSILON_DEG,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub max_segment_km: f64,
    pub violation_window_ms: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_segment_km: DEFAULT_MAX_SEGMENT_KM,
            violation_window_ms: DEFAULT_VIOLATION_WINDOW_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub tick_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

/// Every tunable of the ride and incident pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ride: RideConfig,
    pub stationary: StationaryConfig,
    pub bounds: GeoBounds,
    pub incident: IncidentThresholds,
    pub aggregation: AggregationConfig,
    pub live: LiveConfig,
}

impl PipelineConfig {
    pub fn default_path() -> Result<PathBuf, RidewatchError> {
        Ok(dirs::config_dir()
            .ok_or(RidewatchError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Read the user configuration file if there is one
    pub fn from_local_file() -> Result<Option<Self>, RidewatchError> {
        let config_path = Self::default_path()?;
        if config_path.exists() {
            Self::from_path(&config_path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, RidewatchError> {
        debug!("Loading configuration from {:?}", path);
        let file =
            std::fs::File::open(path).map_err(|e| RidewatchError::ConfigIOError { source: e })?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| RidewatchError::ConfigSerializeError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), RidewatchError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RidewatchError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RidewatchError::ConfigIOError { source: e })?;
            }
        }

        let file =
            std::fs::File::create(path).map_err(|e| RidewatchError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| RidewatchError::ConfigSerializeError { source: e })
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> Result<(), RidewatchError> {
        fn invalid(field: &str, reason: &str) -> RidewatchError {
            RidewatchError::InvalidConfig {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.ride.gap_threshold_ms <= 0 {
            return Err(invalid("ride.gap_threshold_ms", "must be positive"));
        }
        if self.ride.ride_timeout_ms <= 0 {
            return Err(invalid("ride.ride_timeout_ms", "must be positive"));
        }
        if self.ride.recency_window_ms <= 0 {
            return Err(invalid("ride.recency_window_ms", "must be positive"));
        }
        if !(self.stationary.epsilon_deg >= 0.) {
            return Err(invalid("stationary.epsilon_deg", "must not be negative"));
        }
        if !(self.bounds.lat_min <= self.bounds.lat_max && self.bounds.lng_min <= self.bounds.lng_max)
        {
            return Err(invalid("bounds", "minimum must not exceed maximum"));
        }
        if !(self.aggregation.max_segment_km > 0.) {
            return Err(invalid("aggregation.max_segment_km", "must be positive"));
        }
        if self.aggregation.violation_window_ms <= 0 {
            return Err(invalid("aggregation.violation_window_ms", "must be positive"));
        }
        if self.live.tick_interval_ms == 0 {
            return Err(invalid("live.tick_interval_ms", "must be positive"));
        }
        self.incident
            .validate()
            .map_err(|reason| invalid("incident", &reason))
    }
}
