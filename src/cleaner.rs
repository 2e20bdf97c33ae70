//! Iterative outlier removal.
//!
//! Each pass rates every located point against the average speed of the
//! current point set and drops the implausible ones. Removing large outliers
//! changes that average, which can expose smaller ones, so passes repeat until
//! one removes nothing (the fixpoint) or `max_passes` is reached.
//!
//! ## Ratings
//!
//! For a segment, `speed rating = (speed / average_speed) / ln(duration + 2)`.
//! The logarithmic damping keeps sub-second jitter from dominating.
//!
//! For a point `i` and each window offset `k`, the segments `i-k -> i` and
//! `i -> i+k` are rated and the slower of the two kept: a genuine outlier is
//! fast to reach *and* fast to leave, while its neighbours have one slow side.
//! The point's speed rating is the maximum of these over all offsets.
//!
//! The distance rating is the triangle-inequality deficit through `i`:
//! `(prev + next - joined) / (prev + next)`.
//!
//! ## Excursions
//!
//! A burst of fixes displaced together (multipath, a tunnel) is consistent
//! with itself, so its inner points look plausible to any window that does
//! not reach outside the burst. A pass therefore also looks for excursions:
//! the track leaves through a fast segment `a -> a+1`, returns through a fast
//! segment `b-1 -> b`, and the direct hop `a -> b` is plausible. Every point
//! strictly between `a` and `b` is an outlier.
//!
//! | Signal | Applies to | Limit |
//! |--------|------------|-------|
//! | window speed | points with both sides | `speed_limit` |
//! | excursion | up to `max_excursion_points` in a row | `speed_limit` |
//! | detour | points with both neighbours | `distance_limit` |
//! | edge speed | first and last point | `edge_speed_limit` |
//! | early start | first `early_start_points` | `early_start_factor × speed_limit` |
//!
//! ## Defaults
//!
//! The numeric defaults in [`CleanerConfig`] were calibrated empirically on
//! recorded tracks; they are not derived analytically.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};
use crate::segment::Segment;
use crate::track::{average_speed, capped_totals, Track, Validity, ValidityThresholds};
use crate::TrackPoint;

/// Largest supported window offset.
pub const MAX_WINDOW_OFFSET: usize = 8;

/// Configuration for the outlier cleaner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Window speed rating at which a point is an outlier.
    /// Default: 2.0
    pub speed_limit: f64,

    /// Detour (triangle deficit) rating at which a point is an outlier.
    /// The deficit never exceeds 1.0, so the default leaves detour checks
    /// to be enabled by tuning.
    /// Default: 5.0
    pub distance_limit: f64,

    /// Rating of the single segment of a first/last point at which it is an outlier.
    /// Default: 2.0
    pub edge_speed_limit: f64,

    /// Segments at least this long (s) are left out of the average speed.
    /// Default: 120
    pub segment_duration_cap_s: i64,

    /// Window offsets around each point, each in `1..=MAX_WINDOW_OFFSET`.
    /// Default: [1, 2, 3]
    pub window_offsets: Vec<usize>,

    /// Number of leading points checked for warm-up bursts.
    /// Default: 10
    pub early_start_points: usize,

    /// Multiple of `speed_limit` that marks a warm-up jump.
    /// Default: 10.0
    pub early_start_factor: f64,

    /// Longest run of displaced points removed as one excursion; 0 disables
    /// excursion checks.
    /// Default: 10
    pub max_excursion_points: usize,

    /// Safety cap on cleaning passes.
    /// Default: 50
    pub max_passes: usize,

    /// Validity thresholds applied to the converged track.
    pub validity: ValidityThresholds,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            speed_limit: 2.0,
            distance_limit: 5.0,
            edge_speed_limit: 2.0,
            segment_duration_cap_s: 120,
            window_offsets: vec![1, 2, 3],
            early_start_points: 10,
            early_start_factor: 10.0,
            max_excursion_points: 10,
            max_passes: 50,
            validity: ValidityThresholds::default(),
        }
    }
}

impl CleanerConfig {
    /// Reject limits and offsets the cleaner cannot work with.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("speed_limit", self.speed_limit),
            ("distance_limit", self.distance_limit),
            ("edge_speed_limit", self.edge_speed_limit),
            ("early_start_factor", self.early_start_factor),
        ];
        for (name, value) in limits {
            if !(value.is_finite() && value > 0.0) {
                return Err(ArchiveError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.segment_duration_cap_s <= 0 {
            return Err(ArchiveError::config("segment_duration_cap_s must be positive"));
        }
        if self.window_offsets.is_empty() {
            return Err(ArchiveError::config("window_offsets must not be empty"));
        }
        if let Some(bad) = self
            .window_offsets
            .iter()
            .find(|&&k| k == 0 || k > MAX_WINDOW_OFFSET)
        {
            return Err(ArchiveError::config(format!(
                "window offset {} outside 1..={}",
                bad, MAX_WINDOW_OFFSET
            )));
        }
        if self.max_passes == 0 {
            return Err(ArchiveError::config("max_passes must be at least 1"));
        }
        Ok(())
    }

    fn early_start_rating(&self) -> f64 {
        self.early_start_factor * self.speed_limit
    }
}

/// Ratings of one point in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRating {
    /// Index into the located points of the rated track
    pub index: usize,
    /// Max over offsets of the slower side's segment rating
    pub speed_rating: f64,
    /// Triangle deficit, when both immediate neighbours exist
    pub distance_rating: Option<f64>,
    /// Single-segment rating of the first or last point
    pub edge_rating: Option<f64>,
    /// Rating of the segment arriving from the previous point
    pub incoming_rating: Option<f64>,
    /// Inside an excursion that leaves and rejoins the track
    pub in_excursion: bool,
    pub is_outlier: bool,
}

/// Segments around one point keyed by offset; slot `k - 1` holds offset `k`.
struct SegmentWindow {
    before: [Option<Segment>; MAX_WINDOW_OFFSET],
    after: [Option<Segment>; MAX_WINDOW_OFFSET],
}

impl SegmentWindow {
    fn build(points: &[TrackPoint], index: usize, offsets: &[usize]) -> Self {
        let mut window = Self {
            before: [None; MAX_WINDOW_OFFSET],
            after: [None; MAX_WINDOW_OFFSET],
        };
        for &k in offsets {
            if k == 0 || k > MAX_WINDOW_OFFSET {
                continue;
            }
            if let Some(start) = index.checked_sub(k) {
                window.before[k - 1] = Segment::new(&points[start], &points[index]);
            }
            if let Some(finish) = points.get(index + k) {
                window.after[k - 1] = Segment::new(&points[index], finish);
            }
        }
        window
    }

    /// Offsets present on both sides of the point.
    fn pairs(&self) -> impl Iterator<Item = (&Segment, &Segment)> {
        self.before
            .iter()
            .zip(self.after.iter())
            .filter_map(|(b, a)| Some((b.as_ref()?, a.as_ref()?)))
    }
}

/// Speed rating of a segment against the track's average speed.
///
/// # Arguments
///
/// * `segment` - Segment between two located points
/// * `average_speed` - Average speed of the current point set (m/s)
///
/// # Returns
///
/// `(speed / average_speed) / ln(duration + 2)`, or 0 when either the average
/// or the segment duration is not positive.
///
/// # Example
///
/// ```rust
/// use track_archiver::cleaner::speed_rating;
/// use track_archiver::{GpsPoint, Segment, TrackPoint};
///
/// let start = TrackPoint::located(0, GpsPoint::new(51.5, -0.12));
/// let finish = TrackPoint::located(1, GpsPoint::new(51.501, -0.12));
/// let segment = Segment::new(&start, &finish).unwrap();
///
/// // ~111 m/s against a 3 m/s average, damped by ln(3)
/// let rating = speed_rating(&segment, 3.0);
/// assert!(rating > 30.0);
/// ```
pub fn speed_rating(segment: &Segment, average_speed: f64) -> f64 {
    if average_speed <= 0.0 || segment.duration_s() <= 0 {
        return 0.0;
    }
    let rating = segment.speed_mps() / average_speed;
    rating / (segment.duration_s() as f64 + 2.0).ln()
}

/// Triangle-inequality deficit of the path `prev.start -> i -> next.finish`.
///
/// 0 when `i` lies on the straight line, approaching 1 for an out-and-back spike.
pub fn distance_rating(prev: &Segment, next: &Segment) -> f64 {
    let through = prev.distance_km() + next.distance_km();
    if through <= 0.0 {
        return 0.0;
    }
    let joined = Segment::new(prev.start(), next.finish()).map_or(0.0, |s| s.distance_km());
    (through - joined) / through
}

/// Outcome of [`Cleaner::clean`].
#[derive(Debug, Clone)]
pub struct CleanReport {
    /// The converged track (located points only)
    pub track: Track,
    /// Passes run, including the final no-op pass
    pub passes: usize,
    /// Located points removed as outliers
    pub removed: usize,
    /// False when `max_passes` stopped the loop
    pub converged: bool,
    /// Validity of the converged track under the configured thresholds
    pub validity: Validity,
}

/// Rule-based outlier remover.
///
/// The configuration is validated once at construction, so a cleaner can
/// not silently skip its window or its passes.
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    config: CleanerConfig,
}

impl Cleaner {
    /// Create a cleaner, rejecting configurations it cannot run with.
    ///
    /// # Example
    ///
    /// ```rust
    /// use track_archiver::{Cleaner, CleanerConfig};
    ///
    /// assert!(Cleaner::new(CleanerConfig::default()).is_ok());
    ///
    /// let broken = CleanerConfig { window_offsets: vec![9], ..Default::default() };
    /// assert!(Cleaner::new(broken).is_err());
    /// ```
    pub fn new(config: CleanerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Clean until a pass removes nothing.
    ///
    /// Never fails on noisy data. The input track is left untouched; an
    /// unusable result is reported through [`CleanReport::validity`].
    pub fn clean(&self, track: &Track) -> CleanReport {
        info!("cleaning {}", track);
        let cap = self.config.segment_duration_cap_s;
        let mut current = if track.segment_duration_cap_s() == cap {
            track.clone()
        } else {
            track.with_segment_duration_cap(cap)
        };

        let mut passes = 0;
        let mut converged = false;
        while passes < self.config.max_passes {
            let (next, _) = self.clean_pass(&current);
            passes += 1;
            let removed = current.ok_count() - next.ok_count();
            current = next;
            if removed == 0 {
                converged = true;
                break;
            }
            debug!("pass {} removed {} points", passes, removed);
        }
        if !converged {
            warn!(
                "Cleaning {} stopped after {} passes without reaching a fixpoint",
                track.basename(),
                passes
            );
        }

        let removed = track.ok_count() - current.ok_count();
        let validity = current.validity(&self.config.validity);
        info!("cleaned {} in {} passes, {} removed", current, passes, removed);

        CleanReport {
            track: current,
            passes,
            removed,
            converged,
            validity,
        }
    }

    /// One rating pass: returns the candidate track and the ratings it was cut by.
    pub fn clean_pass(&self, track: &Track) -> (Track, Vec<PointRating>) {
        let ratings = self.rate_points(track);
        let mut keep: Vec<bool> = ratings.iter().map(|r| !r.is_outlier).collect();

        let threshold = self.config.early_start_rating();
        let early = ratings.len().min(self.config.early_start_points);
        for rating in &ratings[..early] {
            if rating.incoming_rating.is_some_and(|r| r >= threshold) {
                debug!("Cut early start errors before point {}", rating.index);
                keep[..rating.index].iter_mut().for_each(|k| *k = false);
            }
        }

        (track.retain_located(&keep), ratings)
    }

    /// Rate every located point of `track` against its current average speed.
    pub fn rate_points(&self, track: &Track) -> Vec<PointRating> {
        let points = track.ok_points();
        let (distance_km, duration_s) =
            capped_totals(&track.segments(), self.config.segment_duration_cap_s);
        let average = average_speed(distance_km, duration_s);

        #[cfg(feature = "parallel")]
        let mut ratings: Vec<PointRating> = {
            use rayon::prelude::*;
            (0..points.len())
                .into_par_iter()
                .map(|index| self.rate_point(points, index, average))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut ratings: Vec<PointRating> = (0..points.len())
            .map(|index| self.rate_point(points, index, average))
            .collect();

        for (first, last) in self.excursions(points, average) {
            debug!("excursion over points {}..={}", first, last);
            for rating in &mut ratings[first..=last] {
                rating.in_excursion = true;
                rating.is_outlier = true;
            }
        }

        for rating in &ratings {
            debug!(
                "point {:03}: speed {:.2} distance {} edge {}{}{}",
                rating.index,
                rating.speed_rating,
                rating.distance_rating.map_or("-".to_string(), |d| format!("{:.2}", d)),
                rating.edge_rating.map_or("-".to_string(), |e| format!("{:.2}", e)),
                if rating.in_excursion { " excursion" } else { "" },
                if rating.is_outlier { " << deleting" } else { "" },
            );
        }
        ratings
    }

    /// Inclusive index ranges of displaced runs that leave and rejoin the track.
    ///
    /// For every fast segment `a -> a+1`, the nearest `b` within
    /// `max_excursion_points + 1` steps whose arriving segment `b-1 -> b` is
    /// fast and whose shortcut `a -> b` is plausible closes the excursion.
    fn excursions(&self, points: &[TrackPoint], average: f64) -> Vec<(usize, usize)> {
        let limit = self.config.speed_limit;
        let rating = |from: usize, to: usize| {
            Segment::new(&points[from], &points[to]).map_or(0.0, |s| speed_rating(&s, average))
        };
        let fast: Vec<bool> = (1..points.len()).map(|i| rating(i - 1, i) >= limit).collect();

        let mut found = Vec::new();
        for a in 0..fast.len() {
            if !fast[a] {
                continue;
            }
            let reach = (a + self.config.max_excursion_points + 1).min(fast.len());
            let closing = (a + 2..=reach).find(|&b| fast[b - 1] && rating(a, b) < limit);
            if let Some(b) = closing {
                found.push((a + 1, b - 1));
            }
        }
        found
    }

    fn rate_point(&self, points: &[TrackPoint], index: usize, average: f64) -> PointRating {
        let config = &self.config;
        let window = SegmentWindow::build(points, index, &config.window_offsets);

        let speed = window
            .pairs()
            .map(|(before, after)| {
                speed_rating(before, average).min(speed_rating(after, average))
            })
            .fold(0.0, f64::max);

        let prev = index
            .checked_sub(1)
            .and_then(|p| Segment::new(&points[p], &points[index]));
        let next = points
            .get(index + 1)
            .and_then(|n| Segment::new(&points[index], n));

        let distance = match (&prev, &next) {
            (Some(p), Some(n)) => Some(distance_rating(p, n)),
            _ => None,
        };
        let edge = match (&prev, &next) {
            (None, Some(n)) => Some(speed_rating(n, average)),
            (Some(p), None) => Some(speed_rating(p, average)),
            _ => None,
        };
        let incoming = prev.as_ref().map(|p| speed_rating(p, average));

        let is_outlier = speed >= config.speed_limit
            || distance.is_some_and(|d| d >= config.distance_limit)
            || edge.is_some_and(|e| e >= config.edge_speed_limit);

        PointRating {
            index,
            speed_rating: speed,
            distance_rating: distance,
            edge_rating: edge,
            incoming_rating: incoming,
            in_excursion: false,
            is_outlier,
        }
    }
}
