//! Unified error handling for the track-archiver library.
//!
//! Noisy GPS data is never an error: geometric anomalies are logged and
//! recovered locally, and track invalidity is reported as a
//! [`Validity`](crate::track::Validity) value. The variants here cover the
//! failures a caller has to act on.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for track-archiver operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A decoded point is missing a required field or carries half a position
    #[error("Malformed point #{index}: {reason}")]
    MalformedPoint { index: usize, reason: String },

    /// Point timestamps regress inside a track
    #[error("Track '{source_id}' is not ordered: point #{index} at {timestamp} precedes {previous}")]
    UnorderedPoints {
        source_id: String,
        index: usize,
        timestamp: i64,
        previous: i64,
    },

    /// No canonical naming rule matches the basename
    #[error("Unrecognized track basename '{basename}'")]
    UnrecognizedBasename { basename: String },

    /// The file is not a track file the archive accepts
    #[error("Unsupported extension for '{basename}'")]
    UnsupportedExtension { basename: String },

    /// A copy target already exists and would be overwritten
    #[error("Destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    /// The track file could not be decoded
    #[error("Failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    /// Filesystem failure at the adapter boundary
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ArchiveError {
    /// Wrap an `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ArchiveError::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for track-archiver operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Extension trait for converting Option to ArchiveError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed point error.
    fn ok_or_malformed(self, index: usize, reason: &str) -> Result<T>;

    /// Convert Option to Result with an unrecognized basename error.
    fn ok_or_unrecognized(self, basename: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, index: usize, reason: &str) -> Result<T> {
        self.ok_or_else(|| ArchiveError::MalformedPoint {
            index,
            reason: reason.to_string(),
        })
    }

    fn ok_or_unrecognized(self, basename: &str) -> Result<T> {
        self.ok_or_else(|| ArchiveError::UnrecognizedBasename {
            basename: basename.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArchiveError::UnrecognizedBasename {
            basename: "randomfile123".to_string(),
        };
        assert!(err.to_string().contains("randomfile123"));

        let err = ArchiveError::DestinationExists {
            path: PathBuf::from("/archive/2020/a.FIT"),
        };
        assert!(err.to_string().contains("/archive/2020/a.FIT"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i64> = None;
        let result = none.ok_or_malformed(7, "missing timestamp");
        match result {
            Err(ArchiveError::MalformedPoint { index, reason }) => {
                assert_eq!(index, 7);
                assert_eq!(reason, "missing timestamp");
            }
            other => panic!("unexpected {:?}", other),
        }

        let none: Option<&str> = None;
        assert!(matches!(
            none.ok_or_unrecognized("x"),
            Err(ArchiveError::UnrecognizedBasename { .. })
        ));
    }
}
