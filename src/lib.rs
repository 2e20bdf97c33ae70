//! # Track Archiver
//!
//! GPS track cleaning, activity classification and content-addressed archiving
//! of activity-recorder (FIT) files.
//!
//! This library provides:
//! - Iterative outlier removal driven by speed and detour ratings
//! - Activity classification (cycling / running / other) from track aggregates
//! - Canonical archival filenames across legacy device naming schemes
//! - Hash-based import of device files into an archive, with gated deletion
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`segment`] | Distance, duration and speed between two fixes |
//! | [`track`] | One recording with statistics computed once |
//! | [`cleaner`] | Outlier removal iterated to a fixpoint |
//! | [`classifier`] | Cycling / running / other from aggregates |
//! | [`canonical`] | Archival basenames from legacy device names |
//! | [`import`] | Hash-based import with gated deletion |
//! | [`decoder`] | Decoded records to tracks, FIT reading |
//! | [`pipeline`] | Clean, classify and name one track |
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel point rating and file hashing with rayon
//! - **`fit`** - Enable the FIT decoder adapter (fitparser)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use track_archiver::{Cleaner, CleanerConfig, GpsPoint, Track, TrackPoint};
//!
//! // A short walk north, one point per second
//! let points: Vec<TrackPoint> = (0..10)
//!     .map(|i| TrackPoint::located(1_500_000_000 + i, GpsPoint::new(51.5 + i as f64 * 0.00003, -0.12)))
//!     .collect();
//!
//! let track = Track::new("2017-07-14-02-40-00.FIT", points, true, None);
//! let report = Cleaner::new(CleanerConfig::default()).unwrap().clean(&track);
//!
//! assert!(report.converged);
//! assert!(report.track.ok_count() <= track.ok_count());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ArchiveError, OptionExt, Result};

// Geographic utilities (distance, offsets)
pub mod geo_utils;

// Derived geometry between two points
pub mod segment;
pub use segment::Segment;

// Track model with immutable derived statistics
pub mod track;
pub use track::{join_tracks, speed_to_pace, Track, TrackStats, Validity, ValidityThresholds};

// Iterative outlier removal
pub mod cleaner;
pub use cleaner::{CleanReport, Cleaner, CleanerConfig, PointRating};

// Activity classification
pub mod classifier;
pub use classifier::{classify, ClassifierConfig, TrackType};

// Canonical archival filenames
pub mod canonical;
pub use canonical::{canonicalize, source_id};

// Content-addressed import of device files
pub mod import;
pub use import::{
    ContentHasher, FileSystem, ImportCoordinator, ImportOptions, ImportOutcome, ImportReport,
    ImportStats, LocalFileSystem, OutcomeKind, Sha256Hasher, TrackLoader,
};

// Decoded record conversion (and the FIT reader behind the `fit` feature)
pub mod decoder;
pub use decoder::{track_from_records, RawRecord};
#[cfg(feature = "fit")]
pub use decoder::{read_fit_file, FitLoader};

// Configuration file support
pub mod config;
pub use config::PipelineConfig;

// Clean -> classify -> canonicalize for one track
pub mod pipeline;
pub use pipeline::{analyze_track, AnalysisSummary, AnalyzedTrack};

// ----------------------------------------------------------------------------
// Points and bounds
// ----------------------------------------------------------------------------

/// A WGS84 position in degrees.
///
/// ```
/// use track_archiver::GpsPoint;
/// let tower_bridge = GpsPoint::new(51.5055, -0.0754);
/// assert!(tower_bridge.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a point from latitude and longitude in degrees.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A single timestamped sample of a recording.
///
/// The position is stored as one optional [`GpsPoint`], so a point is either
/// fully located or not located at all. Device distance and speed are kept
/// for reference only; the cleaner derives its own from positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    timestamp: i64,
    position: Option<GpsPoint>,
    altitude: Option<f64>,
    cadence: Option<u32>,
    heart_rate: Option<u32>,
    distance_m: Option<f64>,
    speed: Option<f64>,
}

impl TrackPoint {
    /// A point without a position fix.
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            position: None,
            altitude: None,
            cadence: None,
            heart_rate: None,
            distance_m: None,
            speed: None,
        }
    }

    /// A point with a position fix.
    pub fn located(timestamp: i64, position: GpsPoint) -> Self {
        Self {
            position: Some(position),
            ..Self::new(timestamp)
        }
    }

    /// Build a point from separately decoded coordinates.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Unix seconds
    /// * `latitude` - Degrees, if the device reported a fix
    /// * `longitude` - Degrees, if the device reported a fix
    ///
    /// # Returns
    ///
    /// `None` when only one of latitude and longitude is present.
    ///
    /// # Example
    ///
    /// ```rust
    /// use track_archiver::TrackPoint;
    ///
    /// let fix = TrackPoint::with_coordinates(1_500_000_000, Some(51.5), Some(-0.12)).unwrap();
    /// assert!(fix.is_located());
    /// assert!(TrackPoint::with_coordinates(1_500_000_000, Some(51.5), None).is_none());
    /// ```
    pub fn with_coordinates(
        timestamp: i64,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Option<Self> {
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                Some(Self::located(timestamp, GpsPoint::new(latitude, longitude)))
            }
            (None, None) => Some(Self::new(timestamp)),
            _ => None,
        }
    }

    pub fn with_altitude(self, altitude: Option<f64>) -> Self {
        Self { altitude, ..self }
    }

    pub fn with_cadence(self, cadence: Option<u32>) -> Self {
        Self { cadence, ..self }
    }

    pub fn with_heart_rate(self, heart_rate: Option<u32>) -> Self {
        Self { heart_rate, ..self }
    }

    /// Attach the device-reported cumulative distance (m) and speed (m/s).
    pub fn with_device_motion(self, distance_m: Option<f64>, speed: Option<f64>) -> Self {
        Self {
            distance_m,
            speed,
            ..self
        }
    }

    /// Unix timestamp in seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn position(&self) -> Option<GpsPoint> {
        self.position
    }

    pub fn latitude(&self) -> Option<f64> {
        self.position.map(|p| p.latitude)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.position.map(|p| p.longitude)
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn cadence(&self) -> Option<u32> {
        self.cadence
    }

    pub fn heart_rate(&self) -> Option<u32> {
        self.heart_rate
    }

    pub fn distance_m(&self) -> Option<f64> {
        self.distance_m
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    /// True iff both longitude and latitude are present.
    pub fn is_located(&self) -> bool {
        self.position.is_some()
    }
}

/// Bounding box of a track in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Smallest box holding every point, `None` for no points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let start = Self {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lng: first.longitude,
            max_lng: first.longitude,
        };
        Some(rest.iter().fold(start, |b, p| Self {
            min_lat: b.min_lat.min(p.latitude),
            max_lat: b.max_lat.max(p.latitude),
            min_lng: b.min_lng.min(p.longitude),
            max_lng: b.max_lng.max(p.longitude),
        }))
    }

    /// Middle of the box.
    pub fn center(&self) -> GpsPoint {
        let lat = self.min_lat + (self.max_lat - self.min_lat) / 2.0;
        let lng = self.min_lng + (self.max_lng - self.min_lng) / 2.0;
        GpsPoint::new(lat, lng)
    }

    /// Expand each side by `margin` times the span (map view framing).
    pub fn with_margin(&self, margin: f64) -> Self {
        let lat_pad = (self.max_lat - self.min_lat) * margin;
        let lng_pad = (self.max_lng - self.min_lng) * margin;
        Self {
            min_lat: self.min_lat - lat_pad,
            max_lat: self.max_lat + lat_pad,
            min_lng: self.min_lng - lng_pad,
            max_lng: self.max_lng + lng_pad,
        }
    }
}
