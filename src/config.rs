//! Pipeline configuration.
//!
//! Every section has documented defaults, so a JSON document only needs the
//! values it changes:
//!
//! ```
//! use track_archiver::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{"cleaner": {"speed_limit": 3.0}}"#).unwrap();
//! assert_eq!(config.cleaner.speed_limit, 3.0);
//! assert_eq!(config.cleaner.window_offsets, vec![1, 2, 3]);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierConfig;
use crate::cleaner::CleanerConfig;
use crate::error::{ArchiveError, Result};
use crate::import::ImportOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cleaner: CleanerConfig,
    pub classifier: ClassifierConfig,
    pub import: ImportOptions,
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ArchiveError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ArchiveError::io(path, e))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ArchiveError::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.cleaner.validate()?;

        let classifier = &self.classifier;
        if classifier.running_cycling_split_mps > classifier.max_cycling_speed_mps {
            return Err(ArchiveError::config(format!(
                "running_cycling_split_mps {} exceeds max_cycling_speed_mps {}",
                classifier.running_cycling_split_mps, classifier.max_cycling_speed_mps
            )));
        }
        if classifier.min_cycling_distance_km < 0.0 {
            return Err(ArchiveError::config("min_cycling_distance_km must not be negative"));
        }

        let share = self.cleaner.validity.max_outlier_share;
        if !(share > 0.0 && share <= 1.0) {
            return Err(ArchiveError::config(format!(
                "max_outlier_share must be in (0, 1], got {}",
                share
            )));
        }

        if self.import.extensions.is_empty() {
            return Err(ArchiveError::config("import extensions must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(!config.import.copy);
        assert_eq!(config.import.extensions, vec!["fit".to_string()]);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "cleaner": {"window_offsets": [1, 2], "validity": {"min_count": 10}},
                "import": {"copy": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.cleaner.window_offsets, vec![1, 2]);
        assert_eq!(config.cleaner.validity.min_count, 10);
        assert_eq!(config.cleaner.validity.max_outlier_share, 0.7);
        assert_eq!(config.cleaner.speed_limit, 2.0);
        assert!(config.import.copy);
        assert!(!config.import.delete);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"cleaner": {"speed_limit": -1.0}}"#,
            r#"{"cleaner": {"window_offsets": [0]}}"#,
            r#"{"cleaner": {"validity": {"max_outlier_share": 1.5}}}"#,
            r#"{"classifier": {"running_cycling_split_mps": 12.0}}"#,
            r#"{"import": {"extensions": []}}"#,
            r#"{"cleaner": "#,
        ] {
            assert!(
                matches!(PipelineConfig::from_json_str(json), Err(ArchiveError::Config { .. })),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut config = PipelineConfig::default();
        config.classifier.max_cycling_speed_mps = 12.0;
        std::fs::write(&path, config.to_json_string().unwrap()).unwrap();

        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), config);
        assert!(matches!(
            PipelineConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ArchiveError::Io { .. })
        ));
    }
}
