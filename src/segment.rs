//! Geometry between two track points.

use crate::geo_utils::haversine_km;
use crate::TrackPoint;

/// The geometric and temporal relationship between two located points.
///
/// Distance, duration and speed are computed once at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    start: TrackPoint,
    finish: TrackPoint,
    distance_km: f64,
    duration_s: i64,
    speed_mps: f64,
}

impl Segment {
    /// Build a segment between two points.
    ///
    /// Returns `None` when either point has no position fix. A non-positive
    /// duration (repeated or regressed device timestamp) yields zero speed;
    /// [`Track::new`](crate::Track::new) reports such timestamps once per track.
    pub fn new(start: &TrackPoint, finish: &TrackPoint) -> Option<Self> {
        let (from, to) = (start.position()?, finish.position()?);
        let distance_km = haversine_km(&from, &to);
        let duration_s = finish.timestamp() - start.timestamp();
        let speed_mps = if duration_s > 0 {
            1000.0 * distance_km / duration_s as f64
        } else {
            0.0
        };

        Some(Self {
            start: *start,
            finish: *finish,
            distance_km,
            duration_s,
            speed_mps,
        })
    }

    pub fn start(&self) -> &TrackPoint {
        &self.start
    }

    pub fn finish(&self) -> &TrackPoint {
        &self.finish
    }

    /// Great-circle distance in kilometers.
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    /// Seconds between start and finish (may be zero or negative on bad data).
    pub fn duration_s(&self) -> i64 {
        self.duration_s
    }

    /// Meters per second, zero when the duration is not positive.
    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}

/// Segments between consecutive located points.
pub fn points_to_segments(points: &[TrackPoint]) -> Vec<Segment> {
    points
        .windows(2)
        .filter_map(|w| Segment::new(&w[0], &w[1]))
        .collect()
}
