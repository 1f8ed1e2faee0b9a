// Labels and reports produced by the incident classifier

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of classifying a single record. Exactly one label per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Accident,
    Bump,
    Speeding,
    Fire,
    GpsDisconnected,
    /// Impact sensors evaluated, nothing triggered
    Normal,
    /// Impact sensors absent, the record cannot be evaluated
    Other,
    /// An impact sensor field is present but not numeric
    Invalid,
}

impl Classification {
    /// Labels that the display layer raises as alerts
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Classification::Accident
                | Classification::Bump
                | Classification::Speeding
                | Classification::Fire
        )
    }

    /// Labels derived from an impact on the vehicle
    pub fn is_impact(&self) -> bool {
        matches!(self, Classification::Accident | Classification::Bump)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Accident => "ACCIDENT",
            Classification::Bump => "BUMP",
            Classification::Speeding => "SPEEDING",
            Classification::Fire => "FIRE",
            Classification::GpsDisconnected => "GPS_DISCONNECTED",
            Classification::Normal => "NORMAL",
            Classification::Other => "OTHER",
            Classification::Invalid => "INVALID",
        };
        f.write_str(label)
    }
}

/// Finer grained type of an impact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccidentType {
    Rollover,
    SideImpact,
    HeadOnCollision,
    GeneralAccident,
    /// Bumps: g-force spike without abnormal tilt
    RoadIrregularity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Normal,
    Tilted,
    #[serde(rename = "Rolled Over")]
    RolledOver,
    #[serde(rename = "Upside Down")]
    UpsideDown,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VehicleStatus::Normal => "Normal",
            VehicleStatus::Tilted => "Tilted",
            VehicleStatus::RolledOver => "Rolled Over",
            VehicleStatus::UpsideDown => "Upside Down",
        };
        f.write_str(label)
    }
}

/// Gyroscope axis carrying the larger tilt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiltAxis {
    X,
    Y,
    /// Both axes report the same magnitude
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub status: VehicleStatus,
    pub axis: TiltAxis,
    pub magnitude_deg: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactDirection {
    Front,
    Rear,
    Left,
    Right,
}

impl fmt::Display for ImpactDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImpactDirection::Front => "Front",
            ImpactDirection::Rear => "Rear",
            ImpactDirection::Left => "Left",
            ImpactDirection::Right => "Right",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Classification of one record plus the details the alerting layer shows.
///
/// `device_id`, `timestamp` and `location` are what the clip service needs
/// to cut the dash-cam footage around the incident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub classification: Classification,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accident_type: Option<AccidentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_direction: Option<ImpactDirection>,
    pub device_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ReportLocation>,
}
