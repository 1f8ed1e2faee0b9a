// Library interface for ridewatch
// The binary and the integration tests both build on these modules

pub mod config;
pub mod errors;
pub mod geo;
pub mod incident;
pub mod live;
pub mod ride;
pub mod telemetry;
pub mod writer;

// Re-export commonly used types
pub use config::{FixlessRecordPolicy, PipelineConfig};
pub use errors::RidewatchError;
pub use incident::{Classification, IncidentClassifier, IncidentReport, IncidentThresholds};
pub use live::{LiveOutput, LiveSession};
pub use ride::{
    LiveRideTracker, Ride, RideAggregator, RideSegmenter, RideStatistics, RideSummary,
};
pub use telemetry::{TelemetryRecord, TelemetrySnapshot, ValidatedPoint};
