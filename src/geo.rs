// Geographic helpers shared by the ride pipeline

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Distances below this are GPS jitter and count as no movement
pub const DISTANCE_DEAD_ZONE_KM: f64 = 0.01;

/// Rectangular coordinate window a position must fall in to be usable.
///
/// The default window covers Sri Lanka, where the black-box units were
/// first deployed. Deployments elsewhere pass their own bounds through
/// [`crate::config::PipelineConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl Default for GeoBounds {
    fn default() -> Self {
        Self {
            lat_min: 5.5,
            lat_max: 10.0,
            lng_min: 79.0,
            lng_max: 82.0,
        }
    }
}

impl GeoBounds {
    /// A window that accepts every valid coordinate on the globe
    pub fn world() -> Self {
        Self {
            lat_min: -90.0,
            lat_max: 90.0,
            lng_min: -180.0,
            lng_max: 180.0,
        }
    }
}

/// Great-circle distance between two positions in kilometers.
///
/// Returns exactly `0.0` when the result falls inside the
/// [`DISTANCE_DEAD_ZONE_KM`] so that a parked vehicle does not accumulate
/// distance from position noise.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    let distance = EARTH_RADIUS_KM * c;

    if distance.is_nan() || distance < DISTANCE_DEAD_ZONE_KM {
        0.0
    } else {
        distance
    }
}

pub fn is_within_bounds(lat: f64, lng: f64, bounds: &GeoBounds) -> bool {
    if !lat.is_finite() || !lng.is_finite() {
        return false;
    }
    lat >= bounds.lat_min && lat <= bounds.lat_max && lng >= bounds.lng_min && lng <= bounds.lng_max
}

/// Travel heading between two positions in degrees, measured from the
/// latitude axis towards the longitude axis.
pub fn heading_deg(from_lat: f64, from_lng: f64, to_lat: f64, to_lng: f64) -> f64 {
    (to_lng - from_lng).atan2(to_lat - from_lat).to_degrees()
}
