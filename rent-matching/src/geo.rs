//! Great-circle geometry for search areas and listing points.
//!
//! Everything is expressed in degrees (WGS84 lat/lon) and meters. Distances
//! use the haversine formula on a spherical Earth, which is accurate to well
//! under 0.5% at the scales a housing search works with.

use serde::{Deserialize, Serialize};

use rent_shared::errors::{AppError, AppResult, ErrorCode};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Largest accepted search radius.
pub const MAX_RADIUS_M: f64 = 200_000.0;

/// Slack added to bounding boxes so float rounding never drops a point that
/// the exact distance check would accept.
const BBOX_EPSILON_DEG: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> AppResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::new(
                ErrorCode::InvalidArgument,
                format!("latitude {lat} is outside [-90, 90]"),
            ));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::new(
                ErrorCode::InvalidArgument,
                format!("longitude {lon} is outside [-180, 180]"),
            ));
        }
        Ok(Self { lat, lon })
    }

    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_m(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Haversine distance in meters between two lat/lon points.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

pub fn validate_radius(radius_m: f64) -> AppResult<f64> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(AppError::invalid_argument("radius must be a positive number of meters"));
    }
    if radius_m > MAX_RADIUS_M {
        return Err(AppError::invalid_argument(format!(
            "radius must not exceed {MAX_RADIUS_M} meters"
        )));
    }
    Ok(radius_m)
}

/// A circle on the sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Circle {
    pub fn new(center: Coordinate, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Two circles overlap when their centers are no farther apart than the
    /// sum of their radii. Tangent circles overlap.
    pub fn overlaps(&self, other: &Circle) -> bool {
        self.center.distance_m(&other.center) <= self.radius_m + other.radius_m
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Lat/lon rectangle that encloses every point within some distance of a center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box around all points within `radius_m` of `center`.
    ///
    /// Returns `None` when the box would reach a pole or wrap the
    /// antimeridian; callers then fall back to an unbounded scan.
    pub fn around(center: &Coordinate, radius_m: f64) -> Option<Self> {
        let angular = radius_m / EARTH_RADIUS_M;
        let d_lat = angular.to_degrees() + BBOX_EPSILON_DEG;

        let min_lat = center.lat - d_lat;
        let max_lat = center.lat + d_lat;
        if min_lat <= -90.0 || max_lat >= 90.0 {
            return None;
        }

        let ratio = angular.sin() / center.lat.to_radians().cos();
        if !ratio.is_finite() || ratio >= 1.0 {
            return None;
        }
        let d_lon = ratio.asin().to_degrees() + BBOX_EPSILON_DEG;

        let min_lon = center.lon - d_lon;
        let max_lon = center.lon + d_lon;
        if min_lon < -180.0 || max_lon > 180.0 {
            return None;
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }
}
