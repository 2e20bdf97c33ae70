//! Track model: one recording session as an ordered point sequence.
//!
//! Derived statistics are computed once when a [`Track`] is built and stored in
//! an immutable [`TrackStats`] snapshot. Anything that changes the point set
//! (cleaning, joining) produces a new `Track` with fresh statistics.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::canonical::canonicalize;
use crate::classifier::{classify, ClassifierConfig, TrackType};
use crate::error::{ArchiveError, Result};
use crate::segment::{points_to_segments, Segment};
use crate::{Bounds, GpsPoint, TrackPoint};

/// Segments at least this long are left out of distance/speed aggregates
/// (device sleep, paused recording).
pub const DEFAULT_SEGMENT_DURATION_CAP_S: i64 = 120;

/// Segments at least this long are reported as suspicious.
pub const SEGMENT_DURATION_WARN_S: i64 = 10_000;

/// Margin added around the bounding box for map views.
pub const VIEW_MARGIN: f64 = 0.01;

const BASENAME_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Thresholds deciding whether a track is usable downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityThresholds {
    /// Minimum number of located points.
    /// Default: 2
    pub min_count: usize,

    /// Share of failed or removed points at which the track is rejected.
    /// Default: 0.7
    pub max_outlier_share: f64,
}

impl Default for ValidityThresholds {
    fn default() -> Self {
        Self {
            min_count: 2,
            max_outlier_share: 0.7,
        }
    }
}

/// Structured validity result. Callers decide whether to skip, retry with
/// looser limits, or surface the track to an operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Validity {
    Valid,
    TooFewPoints { ok_count: usize, minimum: usize },
    TooManyOutliers { share: f64, maximum: f64 },
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

/// Aggregate statistics of a track, computed once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStats {
    /// Located points
    pub ok_count: usize,
    /// Points without a position fix
    pub failures_count: usize,
    /// Bounding box of located points
    pub bounds: Option<Bounds>,
    /// Distance over segments shorter than the duration cap (km)
    pub total_distance_km: f64,
    /// Duration over the same segments (s)
    pub total_duration_s: i64,
    /// `total_distance_km / total_duration_s` in m/s, 0 without duration
    pub average_speed_mps: f64,
}

impl TrackStats {
    fn compute(points: &[TrackPoint], ok_points: &[TrackPoint], cap_s: i64) -> Self {
        let segments = points_to_segments(ok_points);
        for segment in &segments {
            if segment.duration_s() >= SEGMENT_DURATION_WARN_S {
                warn!("Strange duration: {}s", segment.duration_s());
            }
        }
        let (total_distance_km, total_duration_s) = capped_totals(&segments, cap_s);
        let positions: Vec<GpsPoint> = ok_points.iter().filter_map(|p| p.position()).collect();

        Self {
            ok_count: ok_points.len(),
            failures_count: points.len() - ok_points.len(),
            bounds: Bounds::from_points(&positions),
            total_distance_km,
            total_duration_s,
            average_speed_mps: average_speed(total_distance_km, total_duration_s),
        }
    }
}

/// Count repeated and regressed timestamps between consecutive points.
fn timestamp_anomalies(points: &[TrackPoint]) -> (usize, usize) {
    points.windows(2).fold((0, 0), |(repeated, regressed), pair| {
        let (previous, current) = (pair[0].timestamp(), pair[1].timestamp());
        if current == previous {
            debug!("Repeated timestamp {}", current);
            (repeated + 1, regressed)
        } else if current < previous {
            debug!("Timestamp {} regresses from {}", current, previous);
            (repeated, regressed + 1)
        } else {
            (repeated, regressed)
        }
    })
}

/// Sum distance (km) and duration (s) over segments shorter than `cap_s`.
pub fn capped_totals(segments: &[Segment], cap_s: i64) -> (f64, i64) {
    segments
        .iter()
        .filter(|s| s.duration_s() < cap_s)
        .fold((0.0, 0), |(distance, duration), s| {
            (distance + s.distance_km(), duration + s.duration_s())
        })
}

/// Meters per second from kilometers and seconds, 0 without duration.
pub fn average_speed(distance_km: f64, duration_s: i64) -> f64 {
    if duration_s > 0 {
        1000.0 * distance_km / duration_s as f64
    } else {
        0.0
    }
}

/// Format a speed as running pace, `m:ss` per kilometer.
///
/// # Example
/// ```
/// use track_archiver::speed_to_pace;
/// assert_eq!(speed_to_pace(1000.0 / 300.0), "5:00");
/// ```
pub fn speed_to_pace(speed_mps: f64) -> String {
    if speed_mps <= 0.0 || !speed_mps.is_finite() {
        return "-:--".to_string();
    }
    let pace = 1000.0 / speed_mps + 0.5;
    let minutes = (pace / 60.0) as i64;
    let seconds = (pace - minutes as f64 * 60.0) as i64;
    format!("{}:{:02}", minutes, seconds)
}

/// One complete GPS recording session.
#[derive(Debug, Clone)]
pub struct Track {
    source: String,
    points: Vec<TrackPoint>,
    ok_points: Vec<TrackPoint>,
    correct_crc: bool,
    timezone: Option<FixedOffset>,
    segment_duration_cap_s: i64,
    dropped: usize,
    stats: TrackStats,
}

impl Track {
    /// Build a track from a fully decoded point stream.
    ///
    /// Repeated or regressed device timestamps are kept in recording order
    /// and logged once per track; the segments across them have zero speed.
    /// Callers that need strictly ordered input can follow up with
    /// [`Track::ensure_ordered`].
    ///
    /// # Arguments
    ///
    /// * `source` - Opaque source identifier, usually the file path
    /// * `points` - Decoded points in recording order
    /// * `correct_crc` - Whether the source file passed its integrity check
    /// * `timezone` - Recording timezone, if the device reported one
    ///
    /// # Example
    ///
    /// ```rust
    /// use track_archiver::{GpsPoint, Track, TrackPoint};
    ///
    /// let points = vec![
    ///     TrackPoint::located(1_500_000_000, GpsPoint::new(51.5, -0.12)),
    ///     TrackPoint::new(1_500_000_001),
    ///     TrackPoint::located(1_500_000_002, GpsPoint::new(51.50005, -0.12)),
    /// ];
    /// let track = Track::new("/device/ABCD1234.FIT", points, true, None);
    /// assert_eq!(track.ok_count(), 2);
    /// assert_eq!(track.failures_count(), 1);
    /// ```
    pub fn new(
        source: impl Into<String>,
        points: Vec<TrackPoint>,
        correct_crc: bool,
        timezone: Option<FixedOffset>,
    ) -> Self {
        let source = source.into();
        let (repeated, regressed) = timestamp_anomalies(&points);
        if repeated + regressed > 0 {
            warn!(
                "Track {}: {} repeated and {} regressed timestamps, treated as zero-speed segments",
                source, repeated, regressed
            );
        }
        Self::assemble(
            source,
            points,
            correct_crc,
            timezone,
            DEFAULT_SEGMENT_DURATION_CAP_S,
            0,
        )
    }

    /// Fail with [`ArchiveError::UnorderedPoints`] at the first regressed timestamp.
    ///
    /// Repeated timestamps pass.
    pub fn ensure_ordered(&self) -> Result<()> {
        match self
            .points
            .windows(2)
            .position(|pair| pair[1].timestamp() < pair[0].timestamp())
        {
            Some(index) => Err(ArchiveError::UnorderedPoints {
                source_id: self.source.clone(),
                index: index + 1,
                timestamp: self.points[index + 1].timestamp(),
                previous: self.points[index].timestamp(),
            }),
            None => Ok(()),
        }
    }

    fn assemble(
        source: String,
        points: Vec<TrackPoint>,
        correct_crc: bool,
        timezone: Option<FixedOffset>,
        segment_duration_cap_s: i64,
        dropped: usize,
    ) -> Self {
        let ok_points: Vec<TrackPoint> = points.iter().copied().filter(|p| p.is_located()).collect();
        let stats = TrackStats::compute(&points, &ok_points, segment_duration_cap_s);
        debug!(
            "Track {}: {} points, {} located, avg {:.2} m/s",
            source,
            points.len(),
            ok_points.len(),
            stats.average_speed_mps
        );
        Self {
            source,
            points,
            ok_points,
            correct_crc,
            timezone,
            segment_duration_cap_s,
            dropped,
            stats,
        }
    }

    /// The same points with aggregates recomputed under another duration cap.
    pub fn with_segment_duration_cap(&self, cap_s: i64) -> Self {
        Self::assemble(
            self.source.clone(),
            self.points.clone(),
            self.correct_crc,
            self.timezone,
            cap_s,
            self.dropped,
        )
    }

    /// New track holding the located points flagged in `keep`.
    ///
    /// Everything else (outliers and unlocated points) counts as dropped.
    pub(crate) fn retain_located(&self, keep: &[bool]) -> Self {
        let points: Vec<TrackPoint> = self
            .ok_points
            .iter()
            .zip(keep)
            .filter(|(_, keep)| **keep)
            .map(|(p, _)| *p)
            .collect();
        let dropped = self.dropped + self.points.len() - points.len();
        Self::assemble(
            self.source.clone(),
            points,
            self.correct_crc,
            self.timezone,
            self.segment_duration_cap_s,
            dropped,
        )
    }

    /// Opaque source identifier, usually the file path.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// File name component of the source.
    pub fn basename(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source)
    }

    /// All points in recording order, located or not.
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Located points only.
    pub fn ok_points(&self) -> &[TrackPoint] {
        &self.ok_points
    }

    /// Number of located points.
    pub fn ok_count(&self) -> usize {
        self.stats.ok_count
    }

    /// Number of points without a position fix.
    pub fn failures_count(&self) -> usize {
        self.stats.failures_count
    }

    /// Points removed from the decoded recording by cleaning.
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }

    /// Whether the source file passed its integrity check.
    pub fn correct_crc(&self) -> bool {
        self.correct_crc
    }

    /// Recording timezone reported by the device.
    pub fn timezone(&self) -> Option<FixedOffset> {
        self.timezone
    }

    pub fn segment_duration_cap_s(&self) -> i64 {
        self.segment_duration_cap_s
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.stats.bounds
    }

    /// Bounding box padded by [`VIEW_MARGIN`] for map display.
    pub fn view_bounds(&self) -> Option<Bounds> {
        self.stats.bounds.map(|b| b.with_margin(VIEW_MARGIN))
    }

    /// Center of the bounding box.
    pub fn middle(&self) -> Option<GpsPoint> {
        self.stats.bounds.map(|b| b.center())
    }

    /// Segments between consecutive located points.
    pub fn segments(&self) -> Vec<Segment> {
        points_to_segments(&self.ok_points)
    }

    pub fn total_distance_km(&self) -> f64 {
        self.stats.total_distance_km
    }

    pub fn total_duration_s(&self) -> i64 {
        self.stats.total_duration_s
    }

    /// Average speed over segments shorter than the duration cap (m/s).
    pub fn average_speed_mps(&self) -> f64 {
        self.stats.average_speed_mps
    }

    /// First located point.
    pub fn start_point(&self) -> Option<&TrackPoint> {
        self.ok_points.first()
    }

    /// Last located point.
    pub fn finish_point(&self) -> Option<&TrackPoint> {
        self.ok_points.last()
    }

    /// First point timestamp; for an empty track the start encoded in a
    /// `YYYY-MM-DD-HH-MM-SS` basename, else 0.
    pub fn start_timestamp(&self) -> i64 {
        if let Some(first) = self.points.first() {
            return first.timestamp();
        }
        let stem = self.basename().split('.').next().unwrap_or_default();
        NaiveDateTime::parse_from_str(stem, BASENAME_TIME_FORMAT)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0)
    }

    /// Start time in the recording timezone, UTC when unknown.
    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.local_time(self.start_timestamp())
    }

    fn local_time(&self, timestamp: i64) -> DateTime<FixedOffset> {
        let offset = self.timezone.unwrap_or_else(|| Utc.fix());
        DateTime::<Utc>::from_timestamp(timestamp, 0)
            .unwrap_or_default()
            .with_timezone(&offset)
    }

    /// Archive year directory of the start time.
    pub fn year_dir(&self) -> String {
        self.start_time().format("%Y").to_string()
    }

    pub fn validity(&self, thresholds: &ValidityThresholds) -> Validity {
        let ok_count = self.ok_count();
        if ok_count < thresholds.min_count {
            return Validity::TooFewPoints {
                ok_count,
                minimum: thresholds.min_count,
            };
        }
        let total = self.points.len() + self.dropped;
        let bad = self.failures_count() + self.dropped;
        let share = if total > 0 { bad as f64 / total as f64 } else { 0.0 };
        if share >= thresholds.max_outlier_share {
            return Validity::TooManyOutliers {
                share,
                maximum: thresholds.max_outlier_share,
            };
        }
        Validity::Valid
    }

    /// Validity under default thresholds.
    pub fn is_valid(&self) -> bool {
        self.validity(&ValidityThresholds::default()).is_valid()
    }

    /// Short status: `is ok` / `has many errors`, with a checksum note.
    pub fn status(&self) -> String {
        let mut msg = if self.is_valid() {
            "is ok".to_string()
        } else {
            "has many errors".to_string()
        };
        if !self.correct_crc {
            msg.push_str(" (with FitCRCError)");
        }
        msg
    }

    pub fn track_type(&self, config: &ClassifierConfig) -> TrackType {
        classify(self.total_distance_km(), self.average_speed_mps(), config)
    }

    /// Archival basename for this recording.
    pub fn canonical_basename(&self) -> Result<String> {
        canonicalize(self.basename(), &self.start_time())
    }

    /// One-line human summary: times, distance, pace, type and patch count.
    pub fn explain(&self, config: &ClassifierConfig) -> String {
        let start = self
            .start_point()
            .map(|p| p.timestamp())
            .unwrap_or_else(|| self.start_timestamp());
        let finish = self.finish_point().map(|p| p.timestamp()).unwrap_or(start);
        let mut line = format!(
            "Track: {}: {}-{} \t{:.3} km at {} ({:.2} m/sec) {}",
            self.source,
            self.local_time(start).format("%Y-%m-%d %H:%M"),
            self.local_time(finish).format("%H:%M"),
            self.total_distance_km(),
            speed_to_pace(self.average_speed_mps()),
            self.average_speed_mps(),
            self.track_type(config),
        );
        if self.failures_count() > 0 {
            line.push_str(&format!(", patches count: {}", self.failures_count()));
        }
        line
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "track {} {}: {} points",
            self.basename(),
            self.status(),
            self.ok_count()
        )?;
        if self.failures_count() > 0 {
            write!(f, " and {} failures", self.failures_count())?;
        }
        Ok(())
    }
}

/// Concatenate several recordings into one track ordered by timestamp.
///
/// The joined track keeps the first known timezone and is checksum-clean only
/// if every part was.
pub fn join_tracks(source: impl Into<String>, tracks: &[Track]) -> Track {
    let mut points: Vec<TrackPoint> = tracks.iter().flat_map(|t| t.points().iter().copied()).collect();
    points.sort_by_key(|p| p.timestamp());
    let correct_crc = tracks.iter().all(|t| t.correct_crc());
    let timezone = tracks.iter().find_map(|t| t.timezone());
    Track::new(source, points, correct_crc, timezone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::offset_point;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    /// Straight track north at `speed` m/s, one point every `step` seconds.
    fn straight_track(count: usize, speed: f64, step: i64) -> Vec<TrackPoint> {
        let origin = GpsPoint::new(51.5, -0.12);
        (0..count)
            .map(|i| {
                let position = offset_point(&origin, speed * step as f64 * i as f64, 0.0);
                TrackPoint::located(1_500_000_000 + step * i as i64, position)
            })
            .collect()
    }

    #[test]
    fn test_stats_for_straight_track() {
        let track = Track::new("a.FIT", straight_track(11, 3.0, 1), true, None);
        assert_eq!(track.ok_count(), 11);
        assert_eq!(track.failures_count(), 0);
        assert_eq!(track.total_duration_s(), 10);
        assert!(approx_eq(track.total_distance_km(), 0.030, 1e-4));
        assert!(approx_eq(track.average_speed_mps(), 3.0, 0.01));
        assert!(track.is_valid());

        let bounds = track.bounds().unwrap();
        assert!(bounds.max_lat > bounds.min_lat);
        let view = track.view_bounds().unwrap();
        assert!(view.max_lat > bounds.max_lat);
        assert!(track.middle().is_some());
    }

    #[test]
    fn test_regressed_timestamp_kept_as_zero_speed_segment() {
        let mut points = straight_track(5, 3.0, 1);
        // Third fix carries the first fix's timestamp
        points[2] = TrackPoint::located(1_500_000_000, points[2].position().unwrap());
        let track = Track::new("a.FIT", points, true, None);

        assert_eq!(track.ok_count(), 5);
        let segments = track.segments();
        assert_eq!(segments[1].duration_s(), -1);
        assert_eq!(segments[1].speed_mps(), 0.0);
        assert_eq!(segments[2].duration_s(), 3);
        assert!(track.average_speed_mps() > 0.0);
    }

    #[test]
    fn test_ensure_ordered_is_opt_in() {
        let mut points = straight_track(5, 3.0, 1);
        points.swap(1, 2);
        let track = Track::new("a.FIT", points, true, None);
        let err = track.ensure_ordered().unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::UnorderedPoints {
                index: 2,
                timestamp: 1_500_000_001,
                previous: 1_500_000_002,
                ..
            }
        ));

        // Repeated timestamps are not a regression
        let mut points = straight_track(3, 3.0, 1);
        points[1] = TrackPoint::located(1_500_000_000, points[1].position().unwrap());
        assert!(Track::new("a.FIT", points, true, None).ensure_ordered().is_ok());
    }

    #[test]
    fn test_long_gaps_excluded_from_average() {
        let mut points = straight_track(6, 3.0, 1);
        // Device sleeps for ten minutes without moving much
        let last = points[5].position().unwrap();
        points.push(TrackPoint::located(1_500_000_000 + 605, offset_point(&last, 10.0, 0.0)));
        let track = Track::new("a.FIT", points, true, None);
        assert_eq!(track.total_duration_s(), 5);
        assert!(approx_eq(track.average_speed_mps(), 3.0, 0.01));

        let uncapped = track.with_segment_duration_cap(10_000);
        assert_eq!(uncapped.total_duration_s(), 605);
        assert!(uncapped.average_speed_mps() < 0.1);
    }

    #[test]
    fn test_validity_thresholds() {
        let mut points = vec![TrackPoint::new(1_500_000_000)];
        points.extend(straight_track(1, 3.0, 1).into_iter().map(|p| {
            TrackPoint::located(1_500_000_001, p.position().unwrap())
        }));
        let track = Track::new("a.FIT", points, true, None);
        assert_eq!(
            track.validity(&ValidityThresholds::default()),
            Validity::TooFewPoints { ok_count: 1, minimum: 2 }
        );

        let mut points: Vec<TrackPoint> = (0..8).map(|i| TrackPoint::new(1_500_000_000 + i)).collect();
        points.extend(straight_track(2, 3.0, 1).into_iter().enumerate().map(|(i, p)| {
            TrackPoint::located(1_500_000_010 + i as i64, p.position().unwrap())
        }));
        let track = Track::new("a.FIT", points, false, None);
        assert!(matches!(
            track.validity(&ValidityThresholds::default()),
            Validity::TooManyOutliers { .. }
        ));
        assert_eq!(track.status(), "has many errors (with FitCRCError)");
    }

    #[test]
    fn test_display_and_explain() {
        let mut points = straight_track(4, 3.0, 60);
        points.insert(2, TrackPoint::new(points[1].timestamp() + 1));
        let track = Track::new("/device/ABCD1234.FIT", points, true, None);
        assert_eq!(track.to_string(), "track ABCD1234.FIT is ok: 4 points and 1 failures");

        let explain = track.explain(&ClassifierConfig::default());
        // 1_500_000_000 is 2017-07-14 02:40:00 UTC
        assert!(explain.starts_with("Track: /device/ABCD1234.FIT: 2017-07-14 02:40-02:43"));
        assert!(explain.contains("0.540 km"));
        assert!(explain.contains("(3.00 m/sec) running"));
        assert!(explain.ends_with(", patches count: 1"));
    }

    #[test]
    fn test_start_time_uses_timezone() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let track = Track::new("a.FIT", straight_track(2, 3.0, 1), true, Some(tz));
        assert_eq!(track.start_time().format("%H:%M").to_string(), "05:40");
        assert_eq!(track.year_dir(), "2017");
    }

    #[test]
    fn test_empty_track_start_from_basename() {
        let track = Track::new("/x/2017-07-14-02-40-00.FIT", vec![], true, None);
        assert_eq!(track.start_timestamp(), 1_500_000_000);
        assert!(!track.is_valid());

        let track = Track::new("/x/ABCD1234.FIT", vec![], true, None);
        assert_eq!(track.start_timestamp(), 0);
    }

    #[test]
    fn test_speed_to_pace() {
        assert_eq!(speed_to_pace(1000.0 / 300.0), "5:00");
        assert_eq!(speed_to_pace(3.0), "5:33");
        assert_eq!(speed_to_pace(0.0), "-:--");
    }

    #[test]
    fn test_join_tracks_orders_points() {
        let first = Track::new("a.FIT", straight_track(3, 3.0, 1), true, None);
        let later: Vec<TrackPoint> = straight_track(3, 3.0, 1)
            .into_iter()
            .map(|p| TrackPoint::located(p.timestamp() + 100, p.position().unwrap()))
            .collect();
        let second = Track::new("b.FIT", later, false, None);

        let joined = join_tracks("joined", &[second, first]);
        assert_eq!(joined.points().len(), 6);
        assert_eq!(joined.start_timestamp(), 1_500_000_000);
        assert!(!joined.correct_crc());
    }
}
