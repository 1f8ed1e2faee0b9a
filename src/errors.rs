// Error types for ridewatch

use crate::live::LiveOutput;
use snafu::Snafu;
use std::{io, sync::mpsc::SendError};

#[derive(Debug, Snafu)]
pub enum RidewatchError {
    // Errors while loading recorded telemetry
    #[snafu(display("Error loading telemetry file"))]
    TelemetryLoaderError { source: io::Error },
    #[snafu(display("Error parsing telemetry file"))]
    TelemetryParseError { source: serde_json::Error },
    #[snafu(display("Invalid telemetry file: {path}"))]
    InvalidTelemetryFile { path: String },

    // Errors while reading and broadcasting live telemetry
    #[snafu(display("Telemetry source error: {description}"))]
    TelemetrySourceError { description: String },
    #[snafu(display("Error broadcasting live event"))]
    EventBroadcastError { source: Box<SendError<LiveOutput>> },
    #[snafu(display("Live session error: {reason}"))]
    LiveSessionError { reason: String },

    // Errors for the event writer
    #[snafu(display("Error writing event file"))]
    WriterError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {field} - {reason}"))]
    InvalidConfig { field: String, reason: String },
}

impl From<SendError<LiveOutput>> for RidewatchError {
    fn from(value: SendError<LiveOutput>) -> Self {
        RidewatchError::EventBroadcastError {
            source: Box::new(value),
        }
    }
}
