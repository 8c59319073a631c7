use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glob::Pattern;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::cache::HashCache;
use crate::config::ScanConfig;
use crate::duplicate;
use crate::fingerprint::Fingerprinter;
use crate::record::{ExtractFailure, ImageRecord};
use crate::report::{DuplicateReport, ScanStats};

/// Emit a progress event at most once per this many processed files.
const PROGRESS_EVERY: usize = 32;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan root: {path}")]
    InvalidPath { path: String },

    #[error("invalid exclude pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("scan cancelled")]
    Cancelled,

    #[error("scan worker thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Discovery,
    Fingerprinting,
    Grouping,
    Complete,
}

/// Drives an end-to-end scan: discovery, cached fingerprint extraction on a
/// bounded worker pool, grouping, report assembly.
pub struct Scanner {
    config: ScanConfig,
    cache: Arc<HashCache>,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        let cache = match &config.cache_path {
            Some(path) => HashCache::load(path),
            None => HashCache::in_memory(),
        };
        Self::with_cache(config, Arc::new(cache))
    }

    /// Construct with an externally owned cache, so the host can share one
    /// cache across scanners or inject a prepared one in tests.
    pub fn with_cache(config: ScanConfig, cache: Arc<HashCache>) -> Self {
        Self {
            config,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Raise the cooperative cancellation flag. Queued work is skipped,
    /// in-flight extraction stops at its next checkpoint, and the scan
    /// resolves to [`ScanError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Start an asynchronous scan on a dedicated thread.
    pub fn scan(&self) -> ScanHandle {
        let (tx, rx) = unbounded();
        let config = self.config.clone();
        let cache = Arc::clone(&self.cache);
        let cancel = Arc::clone(&self.cancel);
        let processed = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let processed_t = Arc::clone(&processed);
        let total_t = Arc::clone(&total);
        let thread = thread::spawn(move || {
            run_scan(&config, &cache, &cancel, &processed_t, &total_t, Some(&tx))
        });

        ScanHandle {
            processed,
            total,
            cancel: Arc::clone(&self.cancel),
            events: rx,
            thread,
        }
    }

    /// Synchronous scan on the calling thread.
    pub fn scan_blocking(&self) -> Result<DuplicateReport, ScanError> {
        let processed = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        run_scan(
            &self.config,
            &self.cache,
            &self.cancel,
            &processed,
            &total,
            None,
        )
    }
}

/// Handle to a running scan.
pub struct ScanHandle {
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    cancel: Arc<AtomicBool>,
    events: Receiver<ScanProgress>,
    thread: thread::JoinHandle<Result<DuplicateReport, ScanError>>,
}

impl ScanHandle {
    /// `(files processed, files discovered)`. The processed count is
    /// monotonically non-decreasing.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.processed.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }

    /// Rate-limited progress events; the receiver can be polled or iterated
    /// from any thread.
    pub fn events(&self) -> &Receiver<ScanProgress> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the scan; a cancelled scan yields `ScanError::Cancelled`
    /// rather than a partial report.
    pub fn join(self) -> Result<DuplicateReport, ScanError> {
        self.thread.join().map_err(|_| ScanError::WorkerPanicked)?
    }
}

fn run_scan(
    config: &ScanConfig,
    cache: &HashCache,
    cancel: &AtomicBool,
    processed: &AtomicUsize,
    total: &AtomicUsize,
    events: Option<&Sender<ScanProgress>>,
) -> Result<DuplicateReport, ScanError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(ScanError::Cancelled);
    }

    if !config.root.is_dir() {
        return Err(ScanError::InvalidPath {
            path: config.root.to_string_lossy().into_owned(),
        });
    }

    let excludes = compile_excludes(&config.exclude_patterns)?;
    let progress = ProgressEmitter::new(events);

    progress.emit(0, 0, ScanPhase::Discovery);
    let paths = discover_files(config, &excludes, cancel)?;
    total.store(paths.len(), Ordering::Relaxed);
    info!(
        "discovered {} candidate files under {}",
        paths.len(),
        config.root.display()
    );
    progress.emit(0, paths.len(), ScanPhase::Fingerprinting);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;

    let fingerprinter = Fingerprinter::new(config.algorithm);
    let cache_hits = AtomicUsize::new(0);
    let total_files = paths.len();

    let mut records: Vec<ImageRecord> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                if cancel.load(Ordering::Relaxed) {
                    // Partial results are discarded below; skip the work.
                    return placeholder_record(path);
                }
                let record = extract_record(path, &fingerprinter, cache, &cache_hits);
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 || done == total_files {
                    progress.emit(done, total_files, ScanPhase::Fingerprinting);
                }
                record
            })
            .collect()
    });

    if cancel.load(Ordering::Relaxed) {
        return Err(ScanError::Cancelled);
    }

    // Grouping input is canonically ordered so the report is independent of
    // worker completion order.
    records.sort_by(|a, b| a.path.cmp(&b.path));

    progress.emit(total_files, total_files, ScanPhase::Grouping);
    let groups = duplicate::build_groups(&records, config.max_distance, config.min_group_size);

    let failures: Vec<ExtractFailure> =
        records.iter().filter_map(|r| r.failure.clone()).collect();
    let files_fingerprinted = records.iter().filter(|r| r.fingerprint.is_some()).count();
    let duplicate_files: usize = groups.iter().map(|g| g.members.len() - 1).sum();
    let reclaimable_bytes: u64 = groups.iter().map(|g| g.reclaimable_bytes).sum();

    let stats = ScanStats {
        files_discovered: total_files,
        files_fingerprinted,
        files_failed: failures.len(),
        duplicate_files,
        reclaimable_bytes,
        cache_hits: cache_hits.load(Ordering::Relaxed),
    };

    if let Err(e) = cache.save() {
        warn!("failed to persist fingerprint cache: {e}");
    }

    progress.emit(total_files, total_files, ScanPhase::Complete);
    info!(
        "scan complete: {} groups, {} duplicates, {} bytes reclaimable, {} failures",
        groups.len(),
        stats.duplicate_files,
        stats.reclaimable_bytes,
        stats.files_failed
    );

    Ok(DuplicateReport {
        groups,
        stats,
        failures,
    })
}

fn compile_excludes(patterns: &[String]) -> Result<Vec<Pattern>, ScanError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ScanError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Single-threaded enumeration feeding the worker pool. Returns candidate
/// paths in sorted order.
fn discover_files(
    config: &ScanConfig,
    excludes: &[Pattern],
    cancel: &AtomicBool,
) -> Result<Vec<PathBuf>, ScanError> {
    let allowed: HashSet<String> = config
        .extensions
        .iter()
        .map(|e| e.to_lowercase())
        .collect();

    let max_depth = if config.recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(&config.root).max_depth(max_depth) {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable directory entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !ext.is_some_and(|e| allowed.contains(&e)) {
            continue;
        }

        if is_excluded(path, excludes) {
            debug!("excluded by pattern: {}", path.display());
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn is_excluded(path: &Path, excludes: &[Pattern]) -> bool {
    excludes.iter().any(|pat| {
        pat.matches_path(path)
            || path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| pat.matches(name))
    })
}

fn file_mtime(meta: &fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .unwrap_or(std::time::UNIX_EPOCH)
        .into()
}

/// Fingerprint one file, consulting the cache first. Never fails: extraction
/// errors are recorded on the returned record so one bad file cannot abort
/// the scan.
fn extract_record(
    path: &Path,
    fingerprinter: &Fingerprinter,
    cache: &HashCache,
    cache_hits: &AtomicUsize,
) -> ImageRecord {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(source) => {
            let err = crate::fingerprint::FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            };
            return ImageRecord {
                path: path.to_path_buf(),
                size_bytes: 0,
                modified: std::time::UNIX_EPOCH.into(),
                width: None,
                height: None,
                format: None,
                fingerprint: None,
                failure: Some(ExtractFailure::from_error(&err)),
            };
        }
    };

    let size_bytes = meta.len();
    let modified = file_mtime(&meta);

    if let Some(fingerprint) = cache.get(path, size_bytes, modified) {
        cache_hits.fetch_add(1, Ordering::Relaxed);
        // The fingerprint is known; dimensions come from a header probe so a
        // cache hit never pays for a full decode.
        let (width, height, format) = match fingerprinter.probe(path) {
            Ok((w, h, f)) => (Some(w), Some(h), f),
            Err(_) => (None, None, None),
        };
        return ImageRecord {
            path: path.to_path_buf(),
            size_bytes,
            modified,
            width,
            height,
            format,
            fingerprint: Some(fingerprint),
            failure: None,
        };
    }

    match fingerprinter.extract(path) {
        Ok(extraction) => {
            cache.put(path, size_bytes, modified, extraction.fingerprint);
            ImageRecord {
                path: path.to_path_buf(),
                size_bytes,
                modified,
                width: Some(extraction.width),
                height: Some(extraction.height),
                format: extraction.format,
                fingerprint: Some(extraction.fingerprint),
                failure: None,
            }
        }
        Err(err) => {
            debug!("extraction failed for {}: {err}", path.display());
            ImageRecord {
                path: path.to_path_buf(),
                size_bytes,
                modified,
                width: None,
                height: None,
                format: None,
                fingerprint: None,
                failure: Some(ExtractFailure::from_error(&err)),
            }
        }
    }
}

fn placeholder_record(path: &Path) -> ImageRecord {
    ImageRecord {
        path: path.to_path_buf(),
        size_bytes: 0,
        modified: std::time::UNIX_EPOCH.into(),
        width: None,
        height: None,
        format: None,
        fingerprint: None,
        failure: None,
    }
}

/// Serializes progress emission so the event stream stays monotonically
/// non-decreasing in `files_processed` even with out-of-order workers.
struct ProgressEmitter<'a> {
    tx: Option<&'a Sender<ScanProgress>>,
    last: Mutex<usize>,
}

impl<'a> ProgressEmitter<'a> {
    fn new(tx: Option<&'a Sender<ScanProgress>>) -> Self {
        Self {
            tx,
            last: Mutex::new(0),
        }
    }

    fn emit(&self, files_processed: usize, total_files: usize, phase: ScanPhase) {
        let Some(tx) = self.tx else { return };
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if files_processed < *last {
            return;
        }
        *last = files_processed;
        // The receiver may be gone; progress is best-effort.
        let _ = tx.send(ScanProgress {
            files_processed,
            total_files,
            phase,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_png(path: &Path) {
        RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 0]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn discovery_honors_recursion_flag() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("top.png"));
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_png(&dir.path().join("nested/deep.png"));
        fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();

        let flat = discover_files(
            &ScanConfig::new(dir.path()).recursive(false),
            &[],
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].ends_with("top.png"));

        let deep = discover_files(
            &ScanConfig::new(dir.path()),
            &[],
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn discovery_applies_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("keep.png"));
        write_png(&dir.path().join("skip_me.png"));

        let excludes = compile_excludes(&["skip_*".to_string()]).unwrap();
        let found = discover_files(
            &ScanConfig::new(dir.path()),
            &excludes,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("keep.png"));
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected() {
        let err = compile_excludes(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_root_is_invalid_path() {
        let scanner = Scanner::new(ScanConfig::new("/definitely/not/here"));
        assert!(matches!(
            scanner.scan_blocking(),
            Err(ScanError::InvalidPath { .. })
        ));
    }

    #[test]
    fn cancelled_scan_returns_cancelled_not_a_report() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("a.png"));

        let scanner = Scanner::new(ScanConfig::new(dir.path()));
        scanner.cancel();
        assert!(matches!(
            scanner.scan_blocking(),
            Err(ScanError::Cancelled)
        ));
    }

    #[test]
    fn extraction_failure_does_not_abort_the_scan() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("ok.png"));
        fs::write(dir.path().join("broken.png"), b"").unwrap();

        let report = Scanner::new(ScanConfig::new(dir.path()))
            .scan_blocking()
            .unwrap();
        assert_eq!(report.stats.files_discovered, 2);
        assert_eq!(report.stats.files_fingerprinted, 1);
        assert_eq!(report.stats.files_failed, 1);
        assert!(report.failures[0].path.ends_with("broken.png"));
    }
}
