//! Content-addressed import of device files into the archive.
//!
//! File identity is the SHA-256 of the bytes, never the name: firmware
//! versions reuse numbering schemes. A source file whose hash is missing
//! from the archive is new and gets copied under its canonical name into a
//! per-year directory. A known hash is either a plain duplicate or, when the
//! archived name no longer carries the source's id, a naming anomaly.
//!
//! All file-system effects go through [`FileSystem`] so a run can be tested
//! against memory or performed as a dry run. Hashing may run in parallel
//! (`parallel` feature); copies and deletions are applied one at a time after
//! every hash is known.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::canonical::{canonicalize, carries_source_id, TRACK_EXTENSION};
use crate::error::{ArchiveError, Result};
use crate::track::Track;

/// Read size for streaming hashes.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Boundaries
// ============================================================================

/// Digest of a file's content, sufficient for exact-duplicate detection.
pub trait ContentHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> Result<String>;
}

/// File-system effects used by the import.
pub trait FileSystem: Send + Sync {
    /// Files below `dir` whose extension matches one of `extensions`
    /// (case-insensitive).
    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>>;

    fn modified(&self, path: &Path) -> Result<SystemTime>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Copy `from` to `to`; fails with [`ArchiveError::DestinationExists`]
    /// rather than overwrite.
    fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;
}

/// Decodes a track file into a [`Track`].
pub trait TrackLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Track>;
}

impl<F> TrackLoader for F
where
    F: Fn(&Path) -> Result<Track> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Track> {
        self(path)
    }
}

/// Streaming SHA-256, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash_file(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buffer).map_err(|e| ArchiveError::io(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(to_hex(&hasher.finalize()))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// The local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

impl FileSystem for LocalFileSystem {
    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                ArchiveError::io(path, io::Error::from(e))
            })?;
            if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| ArchiveError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| ArchiveError::io(path, e))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut source = File::open(from).map_err(|e| ArchiveError::io(from, e))?;
        let mut target = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ArchiveError::DestinationExists {
                    path: to.to_path_buf(),
                },
                _ => ArchiveError::io(to, e),
            })?;
        io::copy(&mut source, &mut target).map_err(|e| ArchiveError::io(to, e))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| ArchiveError::io(path, e))
    }
}

// ============================================================================
// Options and results
// ============================================================================

/// What an import run is allowed to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Copy new files; otherwise only report what would be copied.
    /// Default: false
    pub copy: bool,

    /// Let [`ImportCoordinator::apply_deletions`] remove archived sources.
    /// Default: false
    pub delete: bool,

    /// Extensions considered track files.
    /// Default: ["fit"]
    pub extensions: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            copy: false,
            delete: false,
            extensions: vec![TRACK_EXTENSION.to_string()],
        }
    }
}

/// How one source file was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeKind {
    /// New content, copied into the archive
    Copied,
    /// New content, copy not enabled
    Planned,
    /// Already archived under a consistent name
    Skipped,
    /// Already archived under a name without the source id
    NameAnomaly,
    /// Hashing, decoding, naming or copying failed; see the outcome error
    Failed,
}

/// Result of handling one source file.
///
/// A failed file carries its error message and never stops the batch.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    /// Path of the file on the device
    pub source: PathBuf,
    pub kind: OutcomeKind,
    /// Archive path for new files, existing archive path for known ones
    pub destination: Option<PathBuf>,
    /// Error message of a failed file
    pub error: Option<String>,
}

/// Counters summarizing an import run.
///
/// `total` counts every source file; each file lands in exactly one of
/// `new`, `skipped`, `name_anomaly` or `failed`, and `copied <= new`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Files with unseen content
    pub new: usize,
    /// New files actually copied
    pub copied: usize,
    /// Already archived under a consistent name
    pub skipped: usize,
    /// Already archived under a name without the source id
    pub name_anomaly: usize,
    pub failed: usize,
    pub total: usize,
}

impl ImportStats {
    fn record(&mut self, kind: OutcomeKind) {
        self.total += 1;
        match kind {
            OutcomeKind::Copied => {
                self.new += 1;
                self.copied += 1;
            }
            OutcomeKind::Planned => self.new += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::NameAnomaly => self.name_anomaly += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
    }
}

/// Everything an import run decided, in processing order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub stats: ImportStats,
    /// Per-file outcomes, oldest source first
    pub outcomes: Vec<ImportOutcome>,
    /// Archive path of the most recently modified source
    pub latest_destination: Option<PathBuf>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Imports a device directory into an archive directory.
pub struct ImportCoordinator<'a> {
    fs: &'a dyn FileSystem,
    hasher: &'a dyn ContentHasher,
    loader: &'a dyn TrackLoader,
    options: ImportOptions,
}

impl<'a> ImportCoordinator<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        hasher: &'a dyn ContentHasher,
        loader: &'a dyn TrackLoader,
        options: ImportOptions,
    ) -> Self {
        Self {
            fs,
            hasher,
            loader,
            options,
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import every track file of `source_dir` missing from `dest_dir`.
    ///
    /// Listing failures abort the run; anything that goes wrong with a single
    /// file is recorded in its outcome and the batch continues.
    pub fn run(&self, source_dir: &Path, dest_dir: &Path) -> Result<ImportReport> {
        let start = std::time::Instant::now();
        let sources = self.fs.list_files(source_dir, &self.options.extensions)?;
        let archived = self.fs.list_files(dest_dir, &self.options.extensions)?;
        info!(
            "Importing {} files from {} into {} ({} archived)",
            sources.len(),
            source_dir.display(),
            dest_dir.display(),
            archived.len()
        );

        let mut index = self.hash_index(archived);
        let mut sources: Vec<(SystemTime, PathBuf, Result<String>)> = self
            .hash_all(sources)
            .into_iter()
            .map(|(path, hash)| (self.modified_or_epoch(&path), path, hash))
            .collect();
        sources.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let mut report = ImportReport::default();
        for (_, path, hash) in sources {
            let outcome = match hash {
                Ok(hash) => self.import_one(&path, &hash, &mut index, dest_dir),
                Err(e) => failed(path, e),
            };
            report.stats.record(outcome.kind);
            if outcome.destination.is_some() {
                report.latest_destination = outcome.destination.clone();
            }
            report.outcomes.push(outcome);
        }

        info!(
            "Import stats: {} total, {} new, {} copied, {} skipped, {} name anomalies, {} failed in {:?}",
            report.stats.total,
            report.stats.new,
            report.stats.copied,
            report.stats.skipped,
            report.stats.name_anomaly,
            report.stats.failed,
            start.elapsed()
        );
        Ok(report)
    }

    /// Source files whose content is already in the archive.
    ///
    /// Rescans both sides, so the result never depends on a copy made
    /// earlier in the same process having succeeded.
    pub fn plan_deletions(&self, source_dir: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let sources = self.fs.list_files(source_dir, &self.options.extensions)?;
        let archived = self.fs.list_files(dest_dir, &self.options.extensions)?;
        let index = self.hash_index(archived);

        let candidates: Vec<PathBuf> = self
            .hash_all(sources)
            .into_iter()
            .filter_map(|(path, hash)| match hash {
                Ok(hash) if index.contains_key(&hash) => Some(path),
                Ok(_) => None,
                Err(e) => {
                    warn!("Not deleting unreadable {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        info!("{} archived files can be deleted from {}", candidates.len(), source_dir.display());
        Ok(candidates)
    }

    /// Remove planned files when deletion is enabled; returns the number removed.
    pub fn apply_deletions(&self, candidates: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in candidates {
            if !self.options.delete {
                info!("Can delete {}", path.display());
                continue;
            }
            match self.fs.remove(path) {
                Ok(()) => {
                    info!("Deleted {}", path.display());
                    removed += 1;
                }
                Err(e) => error!("Failed to delete {}: {}", path.display(), e),
            }
        }
        removed
    }

    fn import_one(
        &self,
        path: &Path,
        hash: &str,
        index: &mut HashMap<String, PathBuf>,
        dest_dir: &Path,
    ) -> ImportOutcome {
        if let Some(archived) = index.get(hash) {
            let archived_name = file_name(archived);
            let kind = if carries_source_id(archived_name, file_name(path)) {
                debug!("Already archived: {} -> {}", path.display(), archived.display());
                OutcomeKind::Skipped
            } else {
                warn!("Broken name: {} -> {}", path.display(), archived.display());
                OutcomeKind::NameAnomaly
            };
            return ImportOutcome {
                source: path.to_path_buf(),
                kind,
                destination: Some(archived.clone()),
                error: None,
            };
        }

        match self.place(path, dest_dir) {
            Ok((destination, kind)) => {
                index.insert(hash.to_string(), destination.clone());
                ImportOutcome {
                    source: path.to_path_buf(),
                    kind,
                    destination: Some(destination),
                    error: None,
                }
            }
            Err(e) => failed(path.to_path_buf(), e),
        }
    }

    /// Archive path for a new file, copied when enabled.
    fn place(&self, path: &Path, dest_dir: &Path) -> Result<(PathBuf, OutcomeKind)> {
        let track = self.loader.load(path)?;
        let name = canonicalize(file_name(path), &track.start_time())?;
        let year_dir = dest_dir.join(track.year_dir());
        let destination = year_dir.join(name);

        if self.fs.exists(&destination) {
            return Err(ArchiveError::DestinationExists { path: destination });
        }

        info!("Copy {} -> {}", path.display(), destination.display());
        if !self.options.copy {
            info!("Skipping copy");
            return Ok((destination, OutcomeKind::Planned));
        }
        self.fs.create_dir_all(&year_dir)?;
        self.fs.copy(path, &destination)?;
        Ok((destination, OutcomeKind::Copied))
    }

    fn hash_index(&self, files: Vec<PathBuf>) -> HashMap<String, PathBuf> {
        self.hash_all(files)
            .into_iter()
            .filter_map(|(path, hash)| match hash {
                Ok(hash) => Some((hash, path)),
                Err(e) => {
                    warn!("Ignoring unreadable archive file {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    fn hash_all(&self, files: Vec<PathBuf>) -> Vec<(PathBuf, Result<String>)> {
        #[cfg(feature = "parallel")]
        let hashes: Vec<(PathBuf, Result<String>)> = {
            use rayon::prelude::*;
            files
                .into_par_iter()
                .map(|path| {
                    let hash = self.hasher.hash_file(&path);
                    (path, hash)
                })
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let hashes: Vec<(PathBuf, Result<String>)> = files
            .into_iter()
            .map(|path| {
                let hash = self.hasher.hash_file(&path);
                (path, hash)
            })
            .collect();

        hashes
    }

    fn modified_or_epoch(&self, path: &Path) -> SystemTime {
        self.fs.modified(path).unwrap_or_else(|e| {
            warn!("No modification time for {}: {}", path.display(), e);
            SystemTime::UNIX_EPOCH
        })
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn failed(source: PathBuf, e: ArchiveError) -> ImportOutcome {
    error!("Failed to import {}: {}", source.display(), e);
    ImportOutcome {
        source,
        kind: OutcomeKind::Failed,
        destination: None,
        error: Some(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, TrackPoint};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Files in memory; the "hash" is the content itself.
    #[derive(Default)]
    struct MemoryFs {
        files: Mutex<BTreeMap<PathBuf, (String, SystemTime)>>,
        removed: Mutex<Vec<PathBuf>>,
    }

    impl MemoryFs {
        fn add(&self, path: &str, content: &str, age_s: u64) {
            let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 - age_s);
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), (content.to_string(), modified));
        }

        fn has(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(Path::new(path))
        }
    }

    impl FileSystem for MemoryFs {
        fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter(|p| p.starts_with(dir) && has_extension(p, extensions))
                .cloned()
                .collect())
        }

        fn modified(&self, path: &Path) -> Result<SystemTime> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(_, m)| *m)
                .ok_or_else(|| ArchiveError::io(path, io::ErrorKind::NotFound.into()))
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }

        fn create_dir_all(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn copy(&self, from: &Path, to: &Path) -> Result<()> {
            let mut files = self.files.lock().unwrap();
            if files.contains_key(to) {
                return Err(ArchiveError::DestinationExists { path: to.to_path_buf() });
            }
            let entry = files
                .get(from)
                .cloned()
                .ok_or_else(|| ArchiveError::io(from, io::ErrorKind::NotFound.into()))?;
            files.insert(to.to_path_buf(), entry);
            Ok(())
        }

        fn remove(&self, path: &Path) -> Result<()> {
            self.files.lock().unwrap().remove(path);
            self.removed.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    impl ContentHasher for MemoryFs {
        fn hash_file(&self, path: &Path) -> Result<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(content, _)| content.clone())
                .ok_or_else(|| ArchiveError::io(path, io::ErrorKind::NotFound.into()))
        }
    }

    /// Every file decodes to a short walk starting 2017-07-14 02:40:00 UTC.
    fn load(path: &Path) -> Result<Track> {
        let points = (0..3)
            .map(|i| TrackPoint::located(1_500_000_000 + i, GpsPoint::new(51.5 + i as f64 * 1e-5, -0.12)))
            .collect();
        Ok(Track::new(path.to_string_lossy(), points, true, None))
    }

    fn options(copy: bool, delete: bool) -> ImportOptions {
        ImportOptions {
            copy,
            delete,
            ..Default::default()
        }
    }

    fn run(fs: &MemoryFs, options: ImportOptions) -> ImportReport {
        ImportCoordinator::new(fs, fs, &load, options)
            .run(Path::new("/device"), Path::new("/archive"))
            .unwrap()
    }

    #[test]
    fn test_new_file_copied_under_canonical_name() {
        let fs = MemoryFs::default();
        fs.add("/device/abcd1234.fit", "A", 10);

        let report = run(&fs, options(true, false));
        assert_eq!(report.stats.new, 1);
        assert_eq!(report.stats.copied, 1);
        assert_eq!(report.stats.total, 1);
        assert_eq!(report.outcomes[0].kind, OutcomeKind::Copied);
        assert!(fs.has("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT"));
        assert_eq!(
            report.latest_destination,
            Some(PathBuf::from("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT"))
        );
    }

    #[test]
    fn test_dry_run_copies_nothing() {
        let fs = MemoryFs::default();
        fs.add("/device/abcd1234.fit", "A", 10);

        let report = run(&fs, options(false, false));
        assert_eq!(report.stats.new, 1);
        assert_eq!(report.stats.copied, 0);
        assert_eq!(report.outcomes[0].kind, OutcomeKind::Planned);
        assert!(!fs.has("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT"));
    }

    #[test]
    fn test_same_content_same_id_is_skipped() {
        let fs = MemoryFs::default();
        fs.add("/device/ABCD1234.FIT", "A", 10);
        fs.add("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT", "A", 5);

        let report = run(&fs, options(true, false));
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.copied, 0);
        assert_eq!(report.stats.name_anomaly, 0);
        assert_eq!(fs.files.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_same_content_different_id_is_name_anomaly() {
        let fs = MemoryFs::default();
        fs.add("/device/ABCD1234.FIT", "A", 10);
        fs.add("/archive/2017/2017-07-14-02-40-00_FFFF0000.FIT", "A", 5);

        let report = run(&fs, options(true, false));
        assert_eq!(report.stats.name_anomaly, 1);
        assert_eq!(report.stats.skipped, 0);
        assert_eq!(report.stats.copied, 0);
        assert_eq!(report.outcomes[0].kind, OutcomeKind::NameAnomaly);
    }

    #[test]
    fn test_per_file_failures_do_not_abort_batch() {
        let fs = MemoryFs::default();
        // Different content already occupies the canonical path
        fs.add("/device/abcd1234.fit", "A", 30);
        fs.add("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT", "B", 40);
        fs.add("/device/randomfile123.fit", "C", 20);
        fs.add("/device/beef0001.fit", "D", 10);

        let report = run(&fs, options(true, false));
        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.failed, 2);
        assert_eq!(report.stats.copied, 1);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("already exists"));
        assert!(report.outcomes[1].error.as_deref().unwrap().contains("randomfile123"));
        assert!(fs.has("/archive/2017/2017-07-14-02-40-00_BEEF0001.FIT"));
    }

    #[test]
    fn test_sources_processed_oldest_first() {
        let fs = MemoryFs::default();
        fs.add("/device/bbbb0002.fit", "B", 10);
        fs.add("/device/aaaa0001.fit", "A", 20);

        let report = run(&fs, options(false, false));
        let order: Vec<&Path> = report.outcomes.iter().map(|o| o.source.as_path()).collect();
        assert_eq!(order, vec![Path::new("/device/aaaa0001.fit"), Path::new("/device/bbbb0002.fit")]);
        assert_eq!(
            report.latest_destination,
            Some(PathBuf::from("/archive/2017/2017-07-14-02-40-00_BBBB0002.FIT"))
        );
    }

    #[test]
    fn test_deletion_requires_explicit_option() {
        let fs = MemoryFs::default();
        fs.add("/device/ABCD1234.FIT", "A", 10);
        fs.add("/device/NEWW0001.FIT", "N", 10);
        fs.add("/archive/2017/2017-07-14-02-40-00_ABCD1234.FIT", "A", 5);

        let coordinator = ImportCoordinator::new(&fs, &fs, &load, options(true, false));
        let plan = coordinator
            .plan_deletions(Path::new("/device"), Path::new("/archive"))
            .unwrap();
        assert_eq!(plan, vec![PathBuf::from("/device/ABCD1234.FIT")]);
        assert_eq!(coordinator.apply_deletions(&plan), 0);
        assert!(fs.has("/device/ABCD1234.FIT"));

        let coordinator = ImportCoordinator::new(&fs, &fs, &load, options(false, true));
        assert_eq!(coordinator.apply_deletions(&plan), 1);
        assert!(!fs.has("/device/ABCD1234.FIT"));
        assert!(fs.has("/device/NEWW0001.FIT"));
    }

    #[test]
    fn test_copy_does_not_imply_deletion() {
        let fs = MemoryFs::default();
        fs.add("/device/ABCD1234.FIT", "A", 10);
        run(&fs, options(true, true));
        assert!(fs.has("/device/ABCD1234.FIT"));
        assert!(fs.removed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x0f]), "00ab0f");
    }
}
