//! Clean, classify and name one track.

use log::info;
use serde::Serialize;

use crate::cleaner::{CleanReport, Cleaner};
use crate::classifier::TrackType;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::track::Track;

/// A track after the analysis stages.
#[derive(Debug, Clone)]
pub struct AnalyzedTrack {
    /// The track as decoded, kept for comparison
    pub original: Track,
    pub report: CleanReport,
    /// Classification of the cleaned track
    pub track_type: TrackType,
    pub canonical_basename: String,
}

/// Summary numbers of an analysis, for logs and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub source: String,
    pub canonical_basename: String,
    pub track_type: TrackType,
    pub points: usize,
    pub removed: usize,
    pub passes: usize,
    pub distance_km: f64,
    pub average_speed_mps: f64,
    pub valid: bool,
}

impl AnalyzedTrack {
    /// The cleaned track.
    pub fn cleaned(&self) -> &Track {
        &self.report.track
    }

    pub fn summary(&self) -> AnalysisSummary {
        let cleaned = self.cleaned();
        AnalysisSummary {
            source: self.original.source().to_string(),
            canonical_basename: self.canonical_basename.clone(),
            track_type: self.track_type,
            points: cleaned.ok_count(),
            removed: self.report.removed,
            passes: self.report.passes,
            distance_km: cleaned.total_distance_km(),
            average_speed_mps: cleaned.average_speed_mps(),
            valid: self.report.validity.is_valid(),
        }
    }
}

/// Run the cleaner to its fixpoint, classify the result and compute the
/// archival name.
///
/// Fails on an invalid cleaner configuration or an unrecognized basename;
/// an invalid cleaned track is reported through `report.validity`.
pub fn analyze_track(track: Track, config: &PipelineConfig) -> Result<AnalyzedTrack> {
    let report = Cleaner::new(config.cleaner.clone())?.clean(&track);
    let track_type = report.track.track_type(&config.classifier);
    let canonical_basename = report.track.canonical_basename()?;
    info!("{}", report.track.explain(&config.classifier));

    Ok(AnalyzedTrack {
        original: track,
        report,
        track_type,
        canonical_basename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;
    use crate::geo_utils::offset_point;
    use crate::{GpsPoint, TrackPoint};

    /// 3.6 km ride at 6 m/s, one point every 5 s, with one spike.
    fn ride(name: &str) -> Track {
        let origin = GpsPoint::new(45.0, 7.0);
        let mut points: Vec<TrackPoint> = (0..121)
            .map(|i| {
                let position = offset_point(&origin, 30.0 * i as f64, 0.0);
                TrackPoint::located(1_500_000_000 + 5 * i as i64, position)
            })
            .collect();
        points[60] = TrackPoint::located(
            points[60].timestamp(),
            offset_point(&origin, 1800.0, 2000.0),
        );
        Track::new(name, points, true, None)
    }

    #[test]
    fn test_analyze_ride() {
        let analyzed = analyze_track(ride("/device/abcd1234.fit"), &PipelineConfig::default()).unwrap();
        assert_eq!(analyzed.report.removed, 1);
        assert_eq!(analyzed.track_type, TrackType::Cycling);
        assert_eq!(analyzed.canonical_basename, "2017-07-14-02-40-00_ABCD1234.FIT");
        assert_eq!(analyzed.original.ok_count(), 121);

        let summary = analyzed.summary();
        assert_eq!(summary.points, 120);
        assert!(summary.valid);
        assert!((summary.average_speed_mps - 6.0).abs() < 0.05);
        assert!((summary.distance_km - 3.6).abs() < 0.01);
    }

    #[test]
    fn test_unrecognized_name_fails() {
        let err = analyze_track(ride("/device/randomfile123.fit"), &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnrecognizedBasename { .. }));
    }

    #[test]
    fn test_classifier_thresholds_from_config() {
        let mut config = PipelineConfig::default();
        config.classifier.min_cycling_distance_km = 10.0;
        let analyzed = analyze_track(ride("/device/abcd1234.fit"), &config).unwrap();
        assert_eq!(analyzed.track_type, TrackType::Other);
    }
}
