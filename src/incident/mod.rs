pub mod types;

use serde::{Deserialize, Serialize};

use crate::telemetry::{Axes, TelemetryRecord};

pub use types::{
    AccidentType, Classification, ImpactDirection, IncidentReport, Orientation, ReportLocation,
    TiltAxis, VehicleStatus,
};

/// Vertical force below which an accident with heavy roll is a rollover
const ROLLOVER_MAX_Z_G: f64 = 0.5;
/// Roll needed on the X gyro axis for a rollover
const ROLLOVER_MIN_GYRO_X_DEG: f64 = 70.0;
/// Lateral force that marks a side impact
const SIDE_IMPACT_MIN_X_G: f64 = 3.0;
/// Longitudinal force that marks a head-on collision
const HEAD_ON_MIN_Y_G: f64 = 4.0;

const ACCIDENT_BASE_CONFIDENCE: f64 = 0.7;
const BUMP_CONFIDENCE: f64 = 0.65;
const NORMAL_CONFIDENCE: f64 = 0.99;
const MAX_CONFIDENCE: f64 = 0.99;

/// Sensor thresholds driving the classifier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentThresholds {
    /// Lateral g-force, compared against |X|
    pub g_force_x: f64,
    /// Longitudinal g-force, compared against |Y|
    pub g_force_y: f64,
    /// Lower edge of the normal-gravity band for Z
    pub g_force_z_min: f64,
    /// Upper edge of the normal-gravity band for Z
    pub g_force_z_max: f64,
    /// Abnormal tilt on either gyro axis
    pub gyro_deg: f64,
    pub speeding_kmh: f64,
    pub tilted_deg: f64,
    pub rolled_over_deg: f64,
    pub upside_down_deg: f64,
}

impl Default for IncidentThresholds {
    fn default() -> Self {
        Self {
            g_force_x: 2.5,
            g_force_y: 3.0,
            g_force_z_min: 0.3,
            g_force_z_max: 2.0,
            gyro_deg: 60.0,
            speeding_kmh: 60.0,
            tilted_deg: 45.0,
            rolled_over_deg: 60.0,
            upside_down_deg: 90.0,
        }
    }
}

impl IncidentThresholds {
    pub(crate) fn validate(&self) -> Result<(), String> {
        let positive = [
            ("g_force_x", self.g_force_x),
            ("g_force_y", self.g_force_y),
            ("gyro_deg", self.gyro_deg),
            ("speeding_kmh", self.speeding_kmh),
            ("tilted_deg", self.tilted_deg),
            ("rolled_over_deg", self.rolled_over_deg),
            ("upside_down_deg", self.upside_down_deg),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| !(*value > 0.)) {
            return Err(format!("{} must be positive", name));
        }
        if !(self.g_force_z_min < self.g_force_z_max) {
            return Err("g_force_z_min must be below g_force_z_max".to_string());
        }
        if !(self.tilted_deg <= self.rolled_over_deg && self.rolled_over_deg <= self.upside_down_deg)
        {
            return Err("orientation thresholds must be ascending".to_string());
        }
        Ok(())
    }
}

/// Impact sensor values once every needed axis parsed
#[derive(Clone, Copy, Debug)]
struct ImpactReadings {
    gx: f64,
    gy: f64,
    gz: f64,
    tilt_x: f64,
    tilt_y: f64,
}

impl ImpactReadings {
    fn from_axes(gforces: &Axes, gyro: &Axes) -> Option<Self> {
        Some(Self {
            gx: gforces.x.value()?,
            gy: gforces.y.value()?,
            gz: gforces.z.value()?,
            tilt_x: gyro.x.value()?,
            tilt_y: gyro.y.value()?,
        })
    }
}

/// Stateless classifier mapping one record to one [`Classification`].
///
/// Rules apply in a fixed precedence, the first match wins:
/// GPS loss, fire, speeding, missing impact sensors, then the g-force and
/// gyroscope triggers. Malformed input never makes it fail, it degrades to
/// the least alarming label instead.
#[derive(Clone, Debug, Default)]
pub struct IncidentClassifier {
    thresholds: IncidentThresholds,
}

impl IncidentClassifier {
    pub fn new(thresholds: IncidentThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &IncidentThresholds {
        &self.thresholds
    }

    /// GPS loss is checked before fire, so a fire alarm raised while the
    /// GPS is pending is reported as [`Classification::GpsDisconnected`].
    pub fn classify(&self, record: &TelemetryRecord) -> Classification {
        if record.is_gps_pending() {
            return Classification::GpsDisconnected;
        }
        if record.fire_detected {
            return Classification::Fire;
        }
        if record.speed_kmh() > self.thresholds.speeding_kmh {
            return Classification::Speeding;
        }
        let (Some(gforces), Some(gyro)) = (&record.gforces, &record.gyro) else {
            return Classification::Other;
        };
        match ImpactReadings::from_axes(gforces, gyro) {
            Some(readings) => self.classify_impact(&readings),
            None => Classification::Invalid,
        }
    }

    fn classify_impact(&self, readings: &ImpactReadings) -> Classification {
        match (self.g_force_trigger(readings), self.gyro_trigger(readings)) {
            (true, true) => Classification::Accident,
            (true, false) => Classification::Bump,
            _ => Classification::Normal,
        }
    }

    fn g_force_trigger(&self, r: &ImpactReadings) -> bool {
        let t = &self.thresholds;
        r.gx.abs() > t.g_force_x
            || r.gy.abs() > t.g_force_y
            || r.gz < t.g_force_z_min
            || r.gz > t.g_force_z_max
    }

    fn gyro_trigger(&self, r: &ImpactReadings) -> bool {
        r.tilt_x.abs() > self.thresholds.gyro_deg || r.tilt_y.abs() > self.thresholds.gyro_deg
    }

    /// Orientation of the vehicle from its gyroscope tilt. The larger of the
    /// two axis magnitudes decides the status.
    pub fn vehicle_status(&self, tilt_x: f64, tilt_y: f64) -> Orientation {
        let (x, y) = (tilt_x.abs(), tilt_y.abs());
        let axis = if x > y {
            TiltAxis::X
        } else if y > x {
            TiltAxis::Y
        } else {
            TiltAxis::Both
        };
        let magnitude_deg = x.max(y);
        let t = &self.thresholds;
        let status = if magnitude_deg > t.upside_down_deg {
            VehicleStatus::UpsideDown
        } else if magnitude_deg > t.rolled_over_deg {
            VehicleStatus::RolledOver
        } else if magnitude_deg > t.tilted_deg {
            VehicleStatus::Tilted
        } else {
            VehicleStatus::Normal
        };
        Orientation {
            status,
            axis,
            magnitude_deg,
        }
    }

    /// Side of the vehicle that took the hit. Z is ignored; X wins ties.
    pub fn impact_direction(&self, gx: f64, gy: f64) -> ImpactDirection {
        if gy.abs() > gx.abs() {
            if gy < 0. {
                ImpactDirection::Rear
            } else {
                ImpactDirection::Front
            }
        } else if gx < 0. {
            ImpactDirection::Left
        } else {
            ImpactDirection::Right
        }
    }

    fn accident_type(&self, r: &ImpactReadings) -> AccidentType {
        if r.gz < ROLLOVER_MAX_Z_G && r.tilt_x.abs() > ROLLOVER_MIN_GYRO_X_DEG {
            AccidentType::Rollover
        } else if r.gx.abs() > SIDE_IMPACT_MIN_X_G {
            AccidentType::SideImpact
        } else if r.gy.abs() > HEAD_ON_MIN_Y_G {
            AccidentType::HeadOnCollision
        } else {
            AccidentType::GeneralAccident
        }
    }

    /// Confidence grows with how far each threshold is exceeded. An axis
    /// below its threshold adds nothing rather than lowering the score.
    fn accident_confidence(&self, r: &ImpactReadings) -> f64 {
        let t = &self.thresholds;
        let exceed = |value: f64, threshold: f64, scale: f64, cap: f64| {
            ((value.abs() - threshold) / scale).clamp(0., cap)
        };
        let confidence = ACCIDENT_BASE_CONFIDENCE
            + exceed(r.gx, t.g_force_x, 10., 0.2)
            + exceed(r.gy, t.g_force_y, 10., 0.2)
            + exceed(r.tilt_x, t.gyro_deg, 100., 0.1)
            + exceed(r.tilt_y, t.gyro_deg, 100., 0.1);
        confidence.min(MAX_CONFIDENCE)
    }

    /// Classify a record and attach the impact details
    pub fn report(&self, record: &TelemetryRecord) -> IncidentReport {
        let classification = self.classify(record);
        let readings = match (&record.gforces, &record.gyro) {
            (Some(gforces), Some(gyro)) => ImpactReadings::from_axes(gforces, gyro),
            _ => None,
        };

        let mut report = IncidentReport {
            classification,
            confidence: 1.0,
            accident_type: None,
            orientation: None,
            impact_direction: None,
            device_id: record.device_id.clone(),
            timestamp: record.timestamp.clone(),
            location: record
                .location
                .coordinates()
                .map(|(lat, lng)| ReportLocation { lat, lng }),
        };

        match (classification, readings) {
            (Classification::Accident, Some(r)) => {
                report.confidence = self.accident_confidence(&r);
                report.accident_type = Some(self.accident_type(&r));
            }
            (Classification::Bump, Some(_)) => {
                report.confidence = BUMP_CONFIDENCE;
                report.accident_type = Some(AccidentType::RoadIrregularity);
            }
            (Classification::Normal, _) => report.confidence = NORMAL_CONFIDENCE,
            (Classification::Other | Classification::Invalid, _) => report.confidence = 0.,
            _ => {}
        }

        if let (true, Some(r)) = (classification.is_impact(), readings) {
            report.orientation = Some(self.vehicle_status(r.tilt_x, r.tilt_y));
            report.impact_direction = Some(self.impact_direction(r.gx, r.gy));
        }

        report
    }
}
