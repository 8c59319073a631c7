use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Cached fingerprints older than this are discarded on load.
pub const CACHE_EXPIRY_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    size_bytes: u64,
    modified: DateTime<Utc>,
    fingerprint: Fingerprint,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    hashes: BTreeMap<String, CacheEntry>,
}

/// Fingerprint memo shared across scan workers.
///
/// An entry is valid only while `(size_bytes, modified)` exactly match the
/// current file state; any difference is a miss. A corrupt or unreadable
/// cache file degrades to an empty cache with a logged warning, never a
/// scan failure.
#[derive(Debug)]
pub struct HashCache {
    path: Option<PathBuf>,
    entries: DashMap<String, CacheEntry>,
}

impl HashCache {
    /// In-memory cache with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: DashMap::new(),
        }
    }

    /// Cache backed by a JSON file. Missing file starts empty; a corrupt one
    /// is reset.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CacheFile>(&raw) {
                Ok(file) => {
                    let cutoff = Utc::now() - Duration::days(CACHE_EXPIRY_DAYS);
                    let mut expired = 0usize;
                    for (key, entry) in file.hashes {
                        if entry.cached_at < cutoff {
                            expired += 1;
                        } else {
                            entries.insert(key, entry);
                        }
                    }
                    if expired > 0 {
                        debug!("dropped {expired} expired cache entries");
                    }
                }
                Err(e) => {
                    warn!(
                        "fingerprint cache {} is corrupt ({e}); starting with an empty cache",
                        path.display()
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    "failed to read fingerprint cache {} ({e}); starting with an empty cache",
                    path.display()
                );
            }
        }

        Self {
            path: Some(path),
            entries,
        }
    }

    /// Returns the cached fingerprint only when the stored `(size, mtime)`
    /// pair matches the current file state exactly.
    pub fn get(&self, path: &Path, size_bytes: u64, modified: DateTime<Utc>) -> Option<Fingerprint> {
        let key = path.to_string_lossy();
        let entry = self.entries.get(key.as_ref())?;
        if entry.size_bytes == size_bytes && entry.modified == modified {
            Some(entry.fingerprint)
        } else {
            None
        }
    }

    /// Upsert; last write wins.
    pub fn put(
        &self,
        path: &Path,
        size_bytes: u64,
        modified: DateTime<Utc>,
        fingerprint: Fingerprint,
    ) {
        self.entries.insert(
            path.to_string_lossy().into_owned(),
            CacheEntry {
                size_bytes,
                modified,
                fingerprint,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist to the backing file, if any. No-op for in-memory caches.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = CacheFile::default();
        for entry in self.entries.iter() {
            file.hashes.insert(entry.key().clone(), entry.value().clone());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Write {
                path: path.clone(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })
    }
}
