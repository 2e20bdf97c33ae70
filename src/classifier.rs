//! Activity classification from track aggregates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of activity a track was recorded during.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Cycling,
    Running,
    Other,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackType::Cycling => "cycling",
            TrackType::Running => "running",
            TrackType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Thresholds for [`classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Shortest distance (km) accepted as a ride.
    /// Default: 3.0
    pub min_cycling_distance_km: f64,

    /// Average speed (m/s) separating running from cycling.
    /// Default: 5.0
    pub running_cycling_split_mps: f64,

    /// Fastest plausible average cycling speed (m/s); above is motorized.
    /// Default: 10.0
    pub max_cycling_speed_mps: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_cycling_distance_km: 3.0,
            running_cycling_split_mps: 5.0,
            max_cycling_speed_mps: 10.0,
        }
    }
}

/// Classify an activity from its total distance and average speed.
///
/// Cycling needs both enough distance and a speed between the split and
/// the cap. Anything at or below the split is running; the rest is other.
///
/// # Example
/// ```
/// use track_archiver::{classify, ClassifierConfig, TrackType};
/// let config = ClassifierConfig::default();
/// assert_eq!(classify(5.0, 6.0, &config), TrackType::Cycling);
/// assert_eq!(classify(2.9, 5.0, &config), TrackType::Running);
/// ```
pub fn classify(distance_km: f64, average_speed_mps: f64, config: &ClassifierConfig) -> TrackType {
    let split = config.running_cycling_split_mps;
    if distance_km >= config.min_cycling_distance_km
        && average_speed_mps >= split
        && average_speed_mps <= config.max_cycling_speed_mps
    {
        TrackType::Cycling
    } else if average_speed_mps <= split {
        TrackType::Running
    } else {
        TrackType::Other
    }
}
