//! Conversion from decoded device records to a [`Track`].
//!
//! The binary FIT layout is left to `fitparser` (behind the `fit` feature);
//! the core only sees [`RawRecord`] values with positions still in the
//! device's semicircle encoding.

use chrono::FixedOffset;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, OptionExt, Result};
use crate::track::Track;
use crate::TrackPoint;

/// Timestamps outside this range (Unix seconds) are decoding errors.
pub const PLAUSIBLE_TIMESTAMPS: std::ops::Range<i64> = 1_000_000_000..2_000_000_000;

/// Largest UTC offset accepted for a recording timezone.
pub const MAX_UTC_OFFSET_S: i64 = 14 * 3600;

/// One `record` message as decoded from the device file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Unix seconds
    pub timestamp: Option<i64>,
    /// Semicircles
    pub position_lat: Option<i32>,
    /// Semicircles
    pub position_long: Option<i32>,
    pub altitude: Option<f64>,
    pub cadence: Option<u32>,
    pub heart_rate: Option<u32>,
    pub distance: Option<f64>,
    pub speed: Option<f64>,
}

/// Degrees from the device's 32-bit angular encoding.
pub fn semicircles_to_degrees(value: i32) -> f64 {
    value as f64 * 180.0 / 2f64.powi(31)
}

/// Recording timezone from `local - utc` seconds, if plausible.
pub fn timezone_from_offset(offset_s: i64) -> Option<FixedOffset> {
    if offset_s.abs() > MAX_UTC_OFFSET_S {
        warn!("Invalid timezone offset: {}s", offset_s);
        return None;
    }
    FixedOffset::east_opt(offset_s as i32)
}

impl RawRecord {
    /// Validate and convert to a [`TrackPoint`]; `index` is the message number.
    pub fn to_point(&self, index: usize) -> Result<TrackPoint> {
        let timestamp = self.timestamp.ok_or_malformed(index, "missing timestamp")?;
        if !PLAUSIBLE_TIMESTAMPS.contains(&timestamp) {
            return Err(ArchiveError::MalformedPoint {
                index,
                reason: format!("implausible timestamp {}", timestamp),
            });
        }
        let point = TrackPoint::with_coordinates(
            timestamp,
            self.position_lat.map(semicircles_to_degrees),
            self.position_long.map(semicircles_to_degrees),
        )
        .ok_or_malformed(index, "only one of latitude and longitude")?;

        Ok(point
            .with_altitude(self.altitude)
            .with_cadence(self.cadence)
            .with_heart_rate(self.heart_rate)
            .with_device_motion(self.distance, self.speed))
    }
}

/// Build a track from decoded records.
///
/// Records without a position stay in the track as failures; a record
/// without a usable timestamp fails the whole file.
pub fn track_from_records(
    source: impl Into<String>,
    records: &[RawRecord],
    correct_crc: bool,
    timezone: Option<FixedOffset>,
) -> Result<Track> {
    let points = records
        .iter()
        .enumerate()
        .map(|(index, record)| record.to_point(index))
        .collect::<Result<Vec<_>>>()?;
    Ok(Track::new(source, points, correct_crc, timezone))
}

#[cfg(feature = "fit")]
mod fit {
    use std::collections::HashSet;
    use std::path::Path;

    use fitparser::de::{from_bytes_with_options, DecodeOption};
    use fitparser::profile::MesgNum;
    use fitparser::{FitDataRecord, Value};
    use log::{debug, warn};

    use super::{timezone_from_offset, track_from_records, RawRecord};
    use crate::error::{ArchiveError, Result};
    use crate::import::TrackLoader;
    use crate::track::Track;

    /// Seconds between the Unix epoch and the FIT epoch (1989-12-31).
    const FIT_EPOCH_OFFSET: i64 = 631_065_600;

    /// Decode a FIT file.
    ///
    /// A file failing its checksum is decoded again without CRC validation
    /// and the track records `correct_crc = false`.
    pub fn read_fit_file(path: &Path) -> Result<Track> {
        let bytes = std::fs::read(path).map_err(|e| ArchiveError::io(path, e))?;
        let decode_error = |e: fitparser::Error| ArchiveError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let (messages, correct_crc) = match fitparser::from_bytes(&bytes) {
            Ok(messages) => (messages, true),
            Err(e) => {
                warn!("{}: {}, decoding without CRC validation", path.display(), e);
                let options: HashSet<DecodeOption> = [
                    DecodeOption::SkipHeaderCrcValidation,
                    DecodeOption::SkipDataCrcValidation,
                ]
                .into_iter()
                .collect();
                let messages = from_bytes_with_options(&bytes, &options).map_err(decode_error)?;
                (messages, false)
            }
        };

        let mut records = Vec::new();
        let mut timezone = None;
        for message in &messages {
            match message.kind() {
                MesgNum::Record => records.push(raw_record(message)),
                MesgNum::Activity => timezone = activity_timezone(message),
                _ => {}
            }
        }
        debug!("{}: {} records, timezone {:?}", path.display(), records.len(), timezone);

        track_from_records(path.to_string_lossy(), &records, correct_crc, timezone)
    }

    /// [`TrackLoader`] reading FIT files from disk.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FitLoader;

    impl TrackLoader for FitLoader {
        fn load(&self, path: &Path) -> Result<Track> {
            read_fit_file(path)
        }
    }

    fn raw_record(message: &FitDataRecord) -> RawRecord {
        let mut record = RawRecord::default();
        for field in message.fields() {
            let value = field.value();
            match field.name() {
                "timestamp" => record.timestamp = fit_timestamp(value),
                "position_lat" => record.position_lat = semicircles(value),
                "position_long" => record.position_long = semicircles(value),
                "altitude" | "enhanced_altitude" => {
                    if let Some(v) = fit_value_to_f64(value) {
                        record.altitude = Some(v);
                    }
                }
                "cadence" => record.cadence = fit_value_to_f64(value).map(|v| v as u32),
                "heart_rate" => record.heart_rate = fit_value_to_f64(value).map(|v| v as u32),
                "distance" => record.distance = fit_value_to_f64(value),
                "speed" | "enhanced_speed" => {
                    if let Some(v) = fit_value_to_f64(value) {
                        record.speed = Some(v);
                    }
                }
                _ => {}
            }
        }
        record
    }

    fn activity_timezone(message: &FitDataRecord) -> Option<chrono::FixedOffset> {
        let mut utc = None;
        let mut local = None;
        for field in message.fields() {
            match field.name() {
                "timestamp" => utc = fit_timestamp(field.value()),
                "local_timestamp" => local = fit_timestamp(field.value()),
                _ => {}
            }
        }
        timezone_from_offset(local? - utc?)
    }

    fn fit_timestamp(value: &Value) -> Option<i64> {
        match value {
            Value::Timestamp(ts) => Some(ts.timestamp()),
            Value::UInt32(v) => Some(*v as i64 + FIT_EPOCH_OFFSET),
            _ => None,
        }
    }

    fn semicircles(value: &Value) -> Option<i32> {
        match value {
            Value::SInt32(v) => Some(*v),
            _ => None,
        }
    }

    fn fit_value_to_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::SInt8(v) => Some(*v as f64),
            Value::UInt8(v) => Some(*v as f64),
            Value::UInt8z(v) => Some(*v as f64),
            Value::Byte(v) => Some(*v as f64),
            Value::SInt16(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::UInt16z(v) => Some(*v as f64),
            Value::SInt32(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::UInt32z(v) => Some(*v as f64),
            Value::SInt64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::UInt64z(v) => Some(*v as f64),
            Value::Array(values) => values.iter().find_map(fit_value_to_f64),
            _ => None,
        }
    }

}

#[cfg(feature = "fit")]
pub use fit::{read_fit_file, FitLoader};
