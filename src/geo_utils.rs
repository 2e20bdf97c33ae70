//! Great-circle geometry on WGS84 coordinates.
//!
//! Distances use the haversine formula on a sphere of mean Earth radius
//! (via `geo`), which is well within GPS error for the short hops between
//! consecutive samples. [`offset_point`] is the inverse for building
//! synthetic tracks: it moves a point by local north/east meters.

use geo::{Distance, Haversine, Point};

use crate::GpsPoint;

/// Meters per degree of latitude on the haversine sphere (R = 6,371,008.8 m).
pub const METERS_PER_DEGREE: f64 = 111_195.08;

/// Smallest cos(latitude) used when converting east-west meters to degrees.
const MIN_LONGITUDE_SCALE: f64 = 0.1;

impl From<GpsPoint> for Point<f64> {
    fn from(p: GpsPoint) -> Self {
        Point::new(p.longitude, p.latitude)
    }
}

/// Haversine distance between two points in meters.
///
/// ```rust
/// use track_archiver::{GpsPoint, geo_utils};
///
/// let start = GpsPoint::new(51.5, -0.12);
/// let north = GpsPoint::new(51.501, -0.12);
/// let meters = geo_utils::haversine_distance(&start, &north);
/// assert!((meters - 111.2).abs() < 0.1);
/// ```
#[inline]
pub fn haversine_distance(from: &GpsPoint, to: &GpsPoint) -> f64 {
    Haversine::distance(Point::from(*from), Point::from(*to))
}

/// Haversine distance in kilometers, the unit segments are measured in.
#[inline]
pub fn haversine_km(from: &GpsPoint, to: &GpsPoint) -> f64 {
    haversine_distance(from, to) / 1000.0
}

/// Degrees of longitude spanning `meters` east-west at `latitude`.
///
/// The cos(latitude) scale is clamped near the poles.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let scale = latitude.to_radians().cos().max(MIN_LONGITUDE_SCALE);
    meters / (METERS_PER_DEGREE * scale)
}

/// Move `point` by `north_m` along its meridian and `east_m` along its parallel.
pub fn offset_point(point: &GpsPoint, north_m: f64, east_m: f64) -> GpsPoint {
    GpsPoint::new(
        point.latitude + north_m / METERS_PER_DEGREE,
        point.longitude + meters_to_degrees(east_m, point.latitude),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance_to_self() {
        let p = GpsPoint::new(48.1372, 11.5756);
        assert_eq!(haversine_distance(&p, &p), 0.0);
        assert_eq!(haversine_km(&p, &p), 0.0);
    }

    #[test]
    fn test_distance_between_cities() {
        // Munich to Vienna, roughly 355 km as the crow flies
        let munich = GpsPoint::new(48.1372, 11.5756);
        let vienna = GpsPoint::new(48.2082, 16.3738);
        let km = haversine_km(&munich, &vienna);
        assert!((km - 355.0).abs() < 5.0, "got {}", km);
    }

    #[test]
    fn test_offset_round_trips_through_distance() {
        let origin = GpsPoint::new(51.5, -0.12);
        let north = offset_point(&origin, 500.0, 0.0);
        assert!((haversine_distance(&origin, &north) - 500.0).abs() < 0.5);

        let east = offset_point(&origin, 0.0, 500.0);
        assert!((haversine_distance(&origin, &east) - 500.0).abs() < 1.0);

        let back = offset_point(&north, -500.0, 0.0);
        assert!((back.latitude - origin.latitude).abs() < 1e-12);
    }

    #[test]
    fn test_longitude_degrees_grow_with_latitude() {
        assert!((meters_to_degrees(METERS_PER_DEGREE, 0.0) - 1.0).abs() < 1e-9);
        assert!((meters_to_degrees(METERS_PER_DEGREE, 60.0) - 2.0).abs() < 1e-9);
        // Clamped at the pole
        assert!((meters_to_degrees(METERS_PER_DEGREE, 90.0) - 10.0).abs() < 1e-6);
    }
}
