use std::path::PathBuf;

use crate::fingerprint::FingerprintAlgorithm;

/// File extensions considered image candidates when no explicit allow-list
/// is given. Matching is done on the lowercased extension; the actual format
/// is still sniffed from file content during extraction.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "psd",
];

/// Maximum Hamming distance (in bits, over 64-bit fingerprints) at which two
/// images are still considered duplicates.
pub const DEFAULT_MAX_DISTANCE: u32 = 10;

/// Configuration for a single scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Root folder to scan.
    pub root: PathBuf,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Lowercased extensions that qualify a file for extraction.
    pub extensions: Vec<String>,
    /// Glob patterns; a file matching any of them is skipped.
    pub exclude_patterns: Vec<String>,
    /// Hamming distance threshold for grouping.
    pub max_distance: u32,
    /// Minimum number of members for a group to be reported.
    pub min_group_size: usize,
    /// Worker threads for fingerprint extraction.
    pub workers: usize,
    /// Where to persist the fingerprint cache. `None` keeps the cache
    /// in memory for the lifetime of the scanner only.
    pub cache_path: Option<PathBuf>,
    /// Perceptual hash family used by the extractor.
    pub algorithm: FingerprintAlgorithm,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: Vec::new(),
            max_distance: DEFAULT_MAX_DISTANCE,
            min_group_size: 2,
            workers: num_cpus::get(),
            cache_path: None,
            algorithm: FingerprintAlgorithm::default(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn max_distance(mut self, bits: u32) -> Self {
        self.max_distance = bits;
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn algorithm(mut self, algorithm: FingerprintAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}
