use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, FingerprintError};

/// One scanned file. Created during discovery, populated by the extractor
/// (possibly from the cache), then treated as read-only input to grouping.
///
/// Exactly one of `fingerprint` and `failure` is set once extraction ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub failure: Option<ExtractFailure>,
}

impl ImageRecord {
    /// Pixel area, the primary key for representative selection.
    pub fn pixel_area(&self) -> u64 {
        match (self.width, self.height) {
            (Some(w), Some(h)) => u64::from(w) * u64::from(h),
            _ => 0,
        }
    }
}

/// Why extraction failed for one file. Kept alongside the report so that no
/// unreadable file silently disappears from the results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// File exists but its image data could not be parsed.
    Decode,
    /// Format recognized as not decodable (or not recognizable at all).
    UnsupportedFormat,
    /// The file could not be read.
    Io,
}

impl ExtractFailure {
    pub fn from_error(err: &FingerprintError) -> Self {
        let (path, kind) = match err {
            FingerprintError::Decode { path, .. } => (path.clone(), FailureKind::Decode),
            FingerprintError::UnsupportedFormat { path, .. } => {
                (path.clone(), FailureKind::UnsupportedFormat)
            }
            FingerprintError::Io { path, .. } => (path.clone(), FailureKind::Io),
        };
        ExtractFailure {
            path,
            kind,
            message: err.to_string(),
        }
    }
}
