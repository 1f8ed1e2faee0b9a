pub mod loader;
pub mod producer;
mod wire;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::geo::{GeoBounds, is_within_bounds};

pub use producer::{JsonlReplaySource, MockTelemetrySource, SourceUpdate, TelemetrySource};

/// Value the black-box writes into location and speed fields until the GPS
/// module has its first fix
pub const GPS_PENDING_SENTINEL: &str = "waiting-gps";

/// Store snapshot keyed by ISO-8601 timestamp
pub type TelemetrySnapshot = BTreeMap<String, TelemetryRecord>;

/// A single numeric sensor field as reported by the device.
///
/// Devices send numbers both as JSON numbers and as strings, and use a
/// sentinel string while the GPS has no fix. Every field is decoded into
/// one of these states once, at the edge, so that the pipeline never
/// compares strings.
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    Value(f64),
    /// The GPS sentinel
    Pending,
    /// Present but not a number, keeps the raw text
    Malformed(String),
    Missing,
}

impl Reading {
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reading::Pending)
    }

    /// Decode a text field, accepting an optional trailing `km/h` unit
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Reading::Missing;
        }
        if trimmed.eq_ignore_ascii_case(GPS_PENDING_SENTINEL) {
            return Reading::Pending;
        }
        let numeric = trimmed
            .strip_suffix("km/h")
            .or_else(|| trimmed.strip_suffix("KM/H"))
            .unwrap_or(trimmed)
            .trim();
        match numeric.parse::<f64>() {
            Ok(v) if v.is_finite() => Reading::Value(v),
            _ => Reading::Malformed(raw.to_string()),
        }
    }
}

/// Position state of a record
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    Fix { lat: f64, lng: f64 },
    /// GPS has no fix yet
    Pending,
    /// At least one coordinate is present but unusable
    Malformed { lat: Reading, lng: Reading },
    Missing,
}

impl Location {
    pub fn from_readings(lat: Reading, lng: Reading) -> Self {
        match (lat, lng) {
            (Reading::Pending, _) | (_, Reading::Pending) => Location::Pending,
            (Reading::Value(lat), Reading::Value(lng)) => Location::Fix { lat, lng },
            (Reading::Missing, Reading::Missing) => Location::Missing,
            (lat, lng) => Location::Malformed { lat, lng },
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            Location::Fix { lat, lng } => Some((*lat, *lng)),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Location::Pending)
    }
}

/// Three-axis sensor block. Gyroscope blocks frequently omit `z`.
#[derive(Clone, Debug, PartialEq)]
pub struct Axes {
    pub x: Reading,
    pub y: Reading,
    pub z: Reading,
}

impl Axes {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Reading::Value(x),
            y: Reading::Value(y),
            z: Reading::Value(z),
        }
    }

    /// Gyroscope-style block with only tilt axes
    pub fn planar(x: f64, y: f64) -> Self {
        Self {
            x: Reading::Value(x),
            y: Reading::Value(y),
            z: Reading::Missing,
        }
    }
}

/// One telemetry sample as pushed by a black-box unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::WireRecord", into = "wire::WireRecord")]
pub struct TelemetryRecord {
    /// ISO-8601 instant, also the store key
    pub timestamp: String,
    pub device_id: String,
    pub location: Location,
    /// Speed in km/h
    pub speed: Reading,
    /// Accelerometer in g
    pub gforces: Option<Axes>,
    /// Gyroscope tilt in degrees
    pub gyro: Option<Axes>,
    pub fire_detected: bool,
}

impl Default for TelemetryRecord {
    fn default() -> Self {
        Self {
            timestamp: String::new(),
            device_id: String::new(),
            location: Location::Missing,
            speed: Reading::Missing,
            gforces: None,
            gyro: None,
            fire_detected: false,
        }
    }
}

impl TelemetryRecord {
    /// Epoch milliseconds of the record, `None` when the timestamp is unusable
    pub fn time_ms(&self) -> Option<i64> {
        parse_timestamp_ms(&self.timestamp)
    }

    /// True when either location or speed still carries the GPS sentinel
    pub fn is_gps_pending(&self) -> bool {
        self.location.is_pending() || self.speed.is_pending()
    }

    /// Speed in km/h with unusable values collapsed to zero
    pub fn speed_kmh(&self) -> f64 {
        self.speed.value().filter(|v| *v >= 0.).unwrap_or(0.)
    }
}

/// Record reduced to checked numeric fields, the unit of every spatial
/// computation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPoint {
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    pub timestamp: String,
    pub raw_time_ms: i64,
    /// Travel heading in degrees, known once the ride has a previous point
    pub heading: Option<f64>,
}

impl ValidatedPoint {
    /// Validate a record. Returns `None` for records without a GPS fix,
    /// with malformed or out-of-bounds coordinates, or with an unparsable
    /// timestamp.
    pub fn from_record(record: &TelemetryRecord, bounds: &GeoBounds) -> Option<Self> {
        if record.speed.is_pending() {
            return None;
        }
        let (lat, lng) = record.location.coordinates()?;
        if !is_within_bounds(lat, lng, bounds) {
            return None;
        }
        let raw_time_ms = record.time_ms()?;
        Some(Self {
            lat,
            lng,
            speed_kmh: record.speed_kmh(),
            timestamp: record.timestamp.clone(),
            raw_time_ms,
            heading: None,
        })
    }
}

/// Parse an ISO-8601 instant into epoch milliseconds. Instants without an
/// offset are read as UTC.
pub fn parse_timestamp_ms(timestamp: &str) -> Option<i64> {
    let timestamp = timestamp.trim();
    if timestamp.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(timestamp, format).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Convert a snapshot into a record list, filling in missing record
/// timestamps from the store key
pub fn snapshot_records(snapshot: &TelemetrySnapshot) -> Vec<TelemetryRecord> {
    snapshot
        .iter()
        .map(|(key, record)| {
            let mut record = record.clone();
            if record.timestamp.trim().is_empty() {
                record.timestamp = key.clone();
            }
            record
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Moving record with a fix and calm sensors
    pub(crate) fn record_at(timestamp: &str, lat: f64, lng: f64, speed: f64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: timestamp.to_string(),
            device_id: "ESP12E_001".to_string(),
            location: Location::Fix { lat, lng },
            speed: Reading::Value(speed),
            gforces: Some(Axes::new(0.1, 0.1, 1.0)),
            gyro: Some(Axes::planar(1.0, 1.0)),
            fire_detected: false,
        }
    }

    pub(crate) fn pending_record(timestamp: &str) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: timestamp.to_string(),
            device_id: "ESP12E_001".to_string(),
            location: Location::Pending,
            speed: Reading::Pending,
            ..TelemetryRecord::default()
        }
    }

    /// RFC 3339 timestamp `offset_ms` after 2025-03-10T08:00:00Z
    pub(crate) fn ts(offset_ms: i64) -> String {
        let base = DateTime::parse_from_rfc3339("2025-03-10T08:00:00Z")
            .unwrap()
            .timestamp_millis();
        DateTime::from_timestamp_millis(base + offset_ms)
            .unwrap()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    pub(crate) fn base_ms() -> i64 {
        parse_timestamp_ms("2025-03-10T08:00:00Z").unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_parse() {
        assert_eq!(Reading::parse("42.5"), Reading::Value(42.5));
        assert_eq!(Reading::parse("75 km/h"), Reading::Value(75.0));
        assert_eq!(Reading::parse("75km/h"), Reading::Value(75.0));
        assert_eq!(Reading::parse("waiting-gps"), Reading::Pending);
        assert_eq!(Reading::parse(""), Reading::Missing);
        assert_eq!(
            Reading::parse("abc"),
            Reading::Malformed("abc".to_string())
        );
    }

    #[test]
    fn test_location_states() {
        assert_eq!(
            Location::from_readings(Reading::Value(7.0), Reading::Value(80.0)),
            Location::Fix { lat: 7.0, lng: 80.0 }
        );
        assert_eq!(
            Location::from_readings(Reading::Value(7.0), Reading::Pending),
            Location::Pending
        );
        assert_eq!(
            Location::from_readings(Reading::Missing, Reading::Missing),
            Location::Missing
        );
        assert!(matches!(
            Location::from_readings(Reading::Malformed("x".into()), Reading::Value(80.0)),
            Location::Malformed { .. }
        ));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = 1_741_593_600_000;
        assert_eq!(parse_timestamp_ms("2025-03-10T08:00:00Z"), Some(expected));
        assert_eq!(
            parse_timestamp_ms("2025-03-10T08:00:00.000Z"),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp_ms("2025-03-10T13:30:00+05:30"),
            Some(expected)
        );
        assert_eq!(parse_timestamp_ms("2025-03-10T08:00:00"), Some(expected));
        assert_eq!(parse_timestamp_ms("2025-03-10 08:00:00"), Some(expected));
        assert_eq!(parse_timestamp_ms("waiting-gps"), None);
        assert_eq!(parse_timestamp_ms(""), None);
    }

    #[test]
    fn test_validated_point_requires_fix_and_bounds() {
        let bounds = GeoBounds::default();
        let good = test_support::record_at("2025-03-10T08:00:00Z", 6.9271, 79.8612, 40.0);
        let point = ValidatedPoint::from_record(&good, &bounds).unwrap();
        assert_eq!(point.speed_kmh, 40.0);
        assert_eq!(point.raw_time_ms, 1_741_593_600_000);

        let pending = test_support::pending_record("2025-03-10T08:00:00Z");
        assert!(ValidatedPoint::from_record(&pending, &bounds).is_none());

        let outside = test_support::record_at("2025-03-10T08:00:00Z", 51.5, -0.12, 40.0);
        assert!(ValidatedPoint::from_record(&outside, &bounds).is_none());
        assert!(ValidatedPoint::from_record(&outside, &GeoBounds::world()).is_some());

        let bad_time = test_support::record_at("yesterday", 6.9271, 79.8612, 40.0);
        assert!(ValidatedPoint::from_record(&bad_time, &bounds).is_none());
    }

    #[test]
    fn test_negative_or_malformed_speed_is_zero() {
        let bounds = GeoBounds::default();
        let mut record = test_support::record_at("2025-03-10T08:00:00Z", 6.9, 79.9, -3.0);
        assert_eq!(
            ValidatedPoint::from_record(&record, &bounds)
                .unwrap()
                .speed_kmh,
            0.0
        );
        record.speed = Reading::Malformed("fast".into());
        assert_eq!(
            ValidatedPoint::from_record(&record, &bounds)
                .unwrap()
                .speed_kmh,
            0.0
        );
    }

    #[test]
    fn test_snapshot_records_fill_timestamp_from_key() {
        let mut snapshot = TelemetrySnapshot::new();
        let mut record = test_support::record_at("", 6.9, 79.9, 10.0);
        record.timestamp.clear();
        snapshot.insert("2025-03-10T08:00:00Z".to_string(), record);
        let records = snapshot_records(&snapshot);
        assert_eq!(records[0].timestamp, "2025-03-10T08:00:00Z");
    }
}
