//! Canonical archival filenames.
//!
//! Device firmware has named activity files in several ways over the years.
//! Every recognized form is rewritten to
//! `YYYY-MM-DD-HH-MM-SS_<DEVICE-ID>[-<suffix>].FIT` (or the bare timestamp
//! when the name never carried a device id). Rules are tried in order and
//! the first match wins; an unrecognized name is an error, never a guess.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use log::debug;
use regex::{Captures, Regex};

use crate::error::{ArchiveError, OptionExt, Result};

/// Extension accepted from devices (case-insensitive).
pub const TRACK_EXTENSION: &str = "fit";

const ARCHIVE_EXTENSION: &str = "FIT";
const START_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

static DASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("valid dash regex"));

/// One naming convention and its rewrite to the canonical form.
struct Rule {
    name: &'static str,
    pattern: Regex,
    rewrite: fn(&Captures<'_>, &str) -> String,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, rewrite: fn(&Captures<'_>, &str) -> String) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("valid naming rule regex"),
            rewrite,
        }
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Already canonical
        Rule::new(
            "canonical",
            r"^(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})_(\w{8})(-\w+)?$",
            |c, _| {
                let suffix = c.get(3).map_or("", |m| m.as_str());
                format!("{}_{}{}", &c[1], c[2].to_uppercase(), suffix)
            },
        ),
        Rule::new(
            "dated device",
            r"^(\d{4}-\d{2}-\d{2})_(\d{2}-\d{2}-\d{2})_(\w{8})$",
            |c, _| format!("{}-{}_{}", &c[1], &c[2], c[3].to_uppercase()),
        ),
        Rule::new(
            "bare date",
            r"^(\d{4}-\d{2}-\d{2})[-_](\d{2}-\d{2}-\d{2})$",
            |c, _| format!("{}-{}", &c[1], &c[2]),
        ),
        // Import date prefixed to a device date; only the trailing one counts
        Rule::new(
            "compound",
            r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}_(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})$",
            |c, _| c[1].to_string(),
        ),
        Rule::new("device id", r"^(\w{8})$", |c, start| {
            format!("{}_{}", start, c[1].to_uppercase())
        }),
        Rule::new("device id with suffix", r"^(\w{8})-(\w+)$", |c, start| {
            format!("{}_{}-{}", start, c[1].to_uppercase(), &c[2])
        }),
    ]
});

/// Spaces become dashes and dash runs collapse.
fn normalize_stem(stem: &str) -> String {
    DASH_RUNS.replace_all(&stem.replace(' ', "-"), "-").into_owned()
}

fn split_extension(basename: &str) -> Result<(&str, &str)> {
    basename
        .rsplit_once('.')
        .filter(|(_, ext)| ext.eq_ignore_ascii_case(TRACK_EXTENSION))
        .ok_or_else(|| ArchiveError::UnsupportedExtension {
            basename: basename.to_string(),
        })
}

/// Canonical archival basename for `basename`, recorded starting at `start`.
///
/// `start` is only used by rules whose names carry no timestamp of their own.
///
/// # Example
/// ```
/// use chrono::DateTime;
/// use track_archiver::canonicalize;
///
/// let start = DateTime::parse_from_rfc3339("2017-07-14T02:40:00+00:00").unwrap();
/// assert_eq!(canonicalize("abcd1234.fit", &start).unwrap(), "2017-07-14-02-40-00_ABCD1234.FIT");
/// ```
pub fn canonicalize(basename: &str, start: &DateTime<FixedOffset>) -> Result<String> {
    let (stem, _) = split_extension(basename)?;
    let stem = normalize_stem(stem);
    let start = start.format(START_FORMAT).to_string();

    let (rule, captures) = RULES
        .iter()
        .find_map(|rule| rule.pattern.captures(&stem).map(|c| (rule, c)))
        .ok_or_unrecognized(basename)?;

    let canonical = (rule.rewrite)(&captures, &start);
    debug!("{} -> {} ({} rule)", basename, canonical, rule.name);
    Ok(format!("{}.{}", canonical, ARCHIVE_EXTENSION))
}

/// Identifier a device file keeps inside its archived name.
///
/// The last `_`-separated part of the normalized stem: the device id (with
/// suffix) for device names, the timestamp for date-only names.
pub fn source_id(basename: &str) -> String {
    let stem = basename.rsplit_once('.').map_or(basename, |(stem, _)| stem);
    let stem = normalize_stem(stem);
    stem.rsplit('_').next().unwrap_or_default().to_string()
}

/// Whether an archived basename still carries the source's id (case-insensitive).
pub fn carries_source_id(archived_basename: &str, source_basename: &str) -> bool {
    let id = source_id(source_basename).to_lowercase();
    !id.is_empty() && archived_basename.to_lowercase().contains(&id)
}
