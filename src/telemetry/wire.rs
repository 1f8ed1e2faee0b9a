// JSON shape of a record as the black-box units push it to the store

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Axes, GPS_PENDING_SENTINEL, Location, Reading, TelemetryRecord};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Arrays, objects and anything else a broken unit sends
    Other(Value),
}

impl WireValue {
    fn into_reading(self) -> Reading {
        match self {
            WireValue::Number(v) if v.is_finite() => Reading::Value(v),
            WireValue::Number(v) => Reading::Malformed(v.to_string()),
            WireValue::Bool(b) => Reading::Malformed(b.to_string()),
            WireValue::Text(text) => Reading::parse(&text),
            WireValue::Other(value) => Reading::Malformed(value.to_string()),
        }
    }

    fn into_text(self) -> String {
        match self {
            WireValue::Number(v) => v.to_string(),
            WireValue::Bool(b) => b.to_string(),
            WireValue::Text(text) => text,
            WireValue::Other(value) => value.to_string(),
        }
    }

    fn from_reading(reading: Reading) -> Option<Self> {
        match reading {
            Reading::Value(v) => Some(WireValue::Number(v)),
            Reading::Pending => Some(WireValue::Text(GPS_PENDING_SENTINEL.to_string())),
            Reading::Malformed(raw) => Some(WireValue::Text(raw)),
            Reading::Missing => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            WireValue::Number(v) => *v == 1.,
            WireValue::Bool(b) => *b,
            WireValue::Text(text) => {
                let text = text.trim();
                text == "1" || text.eq_ignore_ascii_case("true")
            }
            WireValue::Other(_) => false,
        }
    }
}

fn reading(value: Option<WireValue>) -> Reading {
    value.map(WireValue::into_reading).unwrap_or(Reading::Missing)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireLocation {
    Coordinates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<WireValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<WireValue>,
    },
    /// Some firmware revisions replace the whole object with the sentinel
    Sentinel(String),
    Other(Value),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct WireAxes {
    #[serde(rename = "X", default, skip_serializing_if = "Option::is_none")]
    x: Option<WireValue>,
    #[serde(rename = "Y", default, skip_serializing_if = "Option::is_none")]
    y: Option<WireValue>,
    #[serde(rename = "Z", default, skip_serializing_if = "Option::is_none")]
    z: Option<WireValue>,
}

/// Axes object, or whatever a unit sent in its place
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireAxesField {
    Axes(WireAxes),
    Other(Value),
}

impl WireAxesField {
    /// Axes that are not an object count as absent sensors
    fn into_axes(self) -> Option<Axes> {
        match self {
            WireAxesField::Axes(axes) => Some(axes.into()),
            WireAxesField::Other(_) => None,
        }
    }
}

impl From<WireAxes> for Axes {
    fn from(value: WireAxes) -> Self {
        Self {
            x: reading(value.x),
            y: reading(value.y),
            z: reading(value.z),
        }
    }
}

impl From<Axes> for WireAxes {
    fn from(value: Axes) -> Self {
        Self {
            x: WireValue::from_reading(value.x),
            y: WireValue::from_reading(value.y),
            z: WireValue::from_reading(value.z),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<WireLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gforces: Option<WireAxesField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gyro: Option<WireAxesField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fire_status: Option<WireValue>,
}

impl From<WireRecord> for TelemetryRecord {
    fn from(value: WireRecord) -> Self {
        let location = match value.location {
            None => Location::Missing,
            Some(WireLocation::Coordinates { lat, lng }) => {
                Location::from_readings(reading(lat), reading(lng))
            }
            Some(WireLocation::Sentinel(text)) => match Reading::parse(&text) {
                Reading::Pending => Location::Pending,
                Reading::Missing => Location::Missing,
                other => Location::Malformed {
                    lat: other.clone(),
                    lng: other,
                },
            },
            Some(WireLocation::Other(value)) => {
                let raw = Reading::Malformed(value.to_string());
                Location::Malformed {
                    lat: raw.clone(),
                    lng: raw,
                }
            }
        };

        Self {
            timestamp: value.timestamp.map(WireValue::into_text).unwrap_or_default(),
            device_id: value.device_id.map(WireValue::into_text).unwrap_or_default(),
            location,
            speed: reading(value.speed),
            gforces: value.gforces.and_then(WireAxesField::into_axes),
            gyro: value.gyro.and_then(WireAxesField::into_axes),
            fire_detected: value
                .fire_status
                .as_ref()
                .map(WireValue::is_truthy)
                .unwrap_or(false),
        }
    }
}

impl From<TelemetryRecord> for WireRecord {
    fn from(value: TelemetryRecord) -> Self {
        let location = match value.location {
            Location::Fix { lat, lng } => Some(WireLocation::Coordinates {
                lat: Some(WireValue::Number(lat)),
                lng: Some(WireValue::Number(lng)),
            }),
            Location::Pending => Some(WireLocation::Coordinates {
                lat: WireValue::from_reading(Reading::Pending),
                lng: WireValue::from_reading(Reading::Pending),
            }),
            Location::Malformed { lat, lng } => Some(WireLocation::Coordinates {
                lat: WireValue::from_reading(lat),
                lng: WireValue::from_reading(lng),
            }),
            Location::Missing => None,
        };

        Self {
            timestamp: Some(value.timestamp)
                .filter(|t| !t.is_empty())
                .map(WireValue::Text),
            device_id: Some(value.device_id)
                .filter(|d| !d.is_empty())
                .map(WireValue::Text),
            location,
            speed: WireValue::from_reading(value.speed),
            gforces: value
                .gforces
                .map(|axes| WireAxesField::Axes(WireAxes::from(axes))),
            gyro: value.gyro.map(|axes| WireAxesField::Axes(WireAxes::from(axes))),
            fire_status: value
                .fire_detected
                .then(|| WireValue::Text("1".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::telemetry::{Axes, Location, Reading, TelemetryRecord};

    #[test]
    fn test_decode_string_encoded_record() {
        let json = r#"{
            "deviceId": "ESP12E_001",
            "timestamp": "2025-03-10T08:00:00Z",
            "location": {"lat": "6.9271", "lng": "79.8612"},
            "speed": "42.5 km/h",
            "gforces": {"X": "0.12", "Y": "-0.40", "Z": "1.01"},
            "gyro": {"X": "3.5", "Y": "-2.0"},
            "fireStatus": "0"
        }"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.device_id, "ESP12E_001");
        assert_eq!(
            record.location,
            Location::Fix {
                lat: 6.9271,
                lng: 79.8612
            }
        );
        assert_eq!(record.speed, Reading::Value(42.5));
        let gforces = record.gforces.unwrap();
        assert_eq!(gforces.y, Reading::Value(-0.4));
        assert_eq!(record.gyro.unwrap().z, Reading::Missing);
        assert!(!record.fire_detected);
    }

    #[test]
    fn test_decode_sentinel_and_numeric_fire_flag() {
        let json = r#"{
            "deviceId": "ESP12E_001",
            "location": {"lat": "waiting-gps", "lng": "waiting-gps"},
            "speed": "waiting-gps",
            "fireStatus": 1
        }"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.location, Location::Pending);
        assert_eq!(record.speed, Reading::Pending);
        assert!(record.fire_detected);
        assert!(record.timestamp.is_empty());
        assert!(record.gforces.is_none());
    }

    #[test]
    fn test_decode_whole_location_sentinel() {
        let json = r#"{"location": "waiting-gps", "speed": 0}"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.location, Location::Pending);
        assert_eq!(record.speed, Reading::Value(0.0));
    }

    #[test]
    fn test_malformed_fields_survive_decoding() {
        let json = r#"{
            "location": {"lat": "??", "lng": 79.9},
            "gforces": {"X": "bad", "Y": 0.1, "Z": 1.0},
            "gyro": {"X": 1, "Y": 2}
        }"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(record.location, Location::Malformed { .. }));
        assert_eq!(
            record.gforces.unwrap().x,
            Reading::Malformed("bad".to_string())
        );
    }

    #[test]
    fn test_off_type_fields_degrade_instead_of_failing() {
        let json = r#"{
            "deviceId": 12,
            "timestamp": "2025-03-10T08:00:00Z",
            "location": 7,
            "speed": [1],
            "gforces": "waiting-gps",
            "gyro": {"X": {"deg": 3}, "Y": 2},
            "fireStatus": [true]
        }"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.device_id, "12");
        assert!(matches!(record.location, Location::Malformed { .. }));
        assert_eq!(record.speed, Reading::Malformed("[1]".to_string()));
        assert!(record.gforces.is_none());
        assert!(matches!(record.gyro.unwrap().x, Reading::Malformed(_)));
        assert!(!record.fire_detected);
    }

    #[test]
    fn test_record_keeps_wire_shape_when_encoded() {
        let record = TelemetryRecord {
            timestamp: "2025-03-10T08:00:00Z".to_string(),
            device_id: "ESP12E_001".to_string(),
            location: Location::Pending,
            speed: Reading::Pending,
            gforces: Some(Axes::new(3.0, 0.0, 1.0)),
            gyro: None,
            fire_detected: true,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["deviceId"], "ESP12E_001");
        assert_eq!(value["location"]["lat"], "waiting-gps");
        assert_eq!(value["speed"], "waiting-gps");
        assert_eq!(value["gforces"]["X"], 3.0);
        assert_eq!(value["fireStatus"], "1");
        assert!(value.get("gyro").is_none());

        let decoded: TelemetryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }
}
