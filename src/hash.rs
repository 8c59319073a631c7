use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 over raw file bytes, used to tell byte-identical duplicates apart
/// from merely similar ones.
pub fn content_hash(path: &Path) -> Result<String, HashError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();
    if len > 0 {
        // Memory-mapped read; the map is dropped at end of scope.
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// True when both files hash to the same digest.
pub fn identical_content(a: &Path, b: &Path) -> Result<bool, HashError> {
    Ok(content_hash(a)? == content_hash(b)?)
}
