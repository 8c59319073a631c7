use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default bound on undo history; the oldest entries are pruned first.
pub const DEFAULT_MAX_HISTORY: usize = 100;

const LEDGER_FILE: &str = "ledger.jsonl";

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("file not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("staged file is missing (already purged?): {path}")]
    StagedFileMissing { path: PathBuf },

    #[error("cannot restore: destination already occupied: {path}")]
    DestinationOccupied { path: PathBuf },

    #[error("no such ledger entry: {id}")]
    UnknownEntry { id: Uuid },

    #[error("could not determine a home directory for the staging area")]
    NoHomeDir,

    #[error("ledger serialization failed: {0}")]
    Ledger(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Delete,
}

/// One recoverable destructive operation: the original location and where
/// the file was staged instead of being destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: Uuid,
    pub kind: OperationKind,
    pub original_path: PathBuf,
    pub staged_path: PathBuf,
    pub size_bytes: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Makes deletions reversible by moving files into a staging directory and
/// journaling each move to a JSON Lines ledger inside it.
///
/// Every delete performed through the manager keeps its entry until it is
/// undone or pruned; `undo` never reports success unless the file was
/// actually restored.
#[derive(Debug)]
pub struct UndoManager {
    staging_dir: PathBuf,
    history: Vec<UndoEntry>,
    max_history: usize,
}

impl UndoManager {
    /// Staging area under the user's home directory.
    pub fn new() -> Result<Self, UndoError> {
        let home = dirs::home_dir().ok_or(UndoError::NoHomeDir)?;
        Self::with_staging_dir(home.join(".imgdedup-trash"))
    }

    /// Staging area at an explicit location. Creates the directory and loads
    /// any existing ledger, so staged files from earlier sessions remain
    /// restorable.
    pub fn with_staging_dir(dir: impl Into<PathBuf>) -> Result<Self, UndoError> {
        let staging_dir = dir.into();
        fs::create_dir_all(&staging_dir)?;

        let mut manager = Self {
            staging_dir,
            history: Vec::new(),
            max_history: DEFAULT_MAX_HISTORY,
        };
        manager.load_ledger();
        Ok(manager)
    }

    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn entries(&self) -> &[UndoEntry] {
        &self.history
    }

    /// Move `path` into the staging directory instead of deleting it, and
    /// record the mapping.
    pub fn record_delete(&mut self, path: &Path) -> Result<UndoEntry, UndoError> {
        if !path.exists() {
            return Err(UndoError::SourceMissing {
                path: path.to_path_buf(),
            });
        }

        let size_bytes = fs::metadata(path)?.len();
        let staged_path = self.unique_staged_name(path);
        move_file(path, &staged_path)?;
        info!("staged {} -> {}", path.display(), staged_path.display());

        let entry = UndoEntry {
            id: Uuid::new_v4(),
            kind: OperationKind::Delete,
            original_path: path.to_path_buf(),
            staged_path,
            size_bytes,
            recorded_at: Utc::now(),
        };

        self.history.push(entry.clone());
        if self.history.len() > self.max_history {
            let dropped = self.history.remove(0);
            // The staged file stays on disk; only the undo bookkeeping goes.
            warn!(
                "undo history full; pruned oldest entry for {}",
                dropped.original_path.display()
            );
        }
        self.rewrite_ledger()?;

        Ok(entry)
    }

    /// Recoverable deletion for a batch of files, in order. Fails fast on the
    /// first error; moves already performed stay recorded and undoable.
    pub fn record_delete_all<'a, I>(&mut self, paths: I) -> Result<Vec<UndoEntry>, UndoError>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut entries = Vec::new();
        for path in paths {
            entries.push(self.record_delete(path)?);
        }
        Ok(entries)
    }

    /// Move the staged file back to its original location. The file system is
    /// left untouched on failure.
    pub fn undo(&mut self, entry: &UndoEntry) -> Result<(), UndoError> {
        let pos = self
            .history
            .iter()
            .position(|e| e.id == entry.id)
            .ok_or(UndoError::UnknownEntry { id: entry.id })?;

        if !entry.staged_path.exists() {
            return Err(UndoError::StagedFileMissing {
                path: entry.staged_path.clone(),
            });
        }
        if entry.original_path.exists() {
            return Err(UndoError::DestinationOccupied {
                path: entry.original_path.clone(),
            });
        }

        if let Some(parent) = entry.original_path.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(&entry.staged_path, &entry.original_path)?;
        info!(
            "restored {} -> {}",
            entry.staged_path.display(),
            entry.original_path.display()
        );

        self.history.remove(pos);
        self.rewrite_ledger()?;
        Ok(())
    }

    /// Undo the most recent operation, if any.
    pub fn undo_last(&mut self) -> Result<Option<UndoEntry>, UndoError> {
        let Some(entry) = self.history.last().cloned() else {
            return Ok(None);
        };
        self.undo(&entry)?;
        Ok(Some(entry))
    }

    /// Forget all history. Staged files remain in the staging directory until
    /// purged externally.
    pub fn clear(&mut self) -> Result<(), UndoError> {
        self.history.clear();
        self.rewrite_ledger()
    }

    fn ledger_path(&self) -> PathBuf {
        self.staging_dir.join(LEDGER_FILE)
    }

    fn load_ledger(&mut self) {
        let path = self.ledger_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("could not read undo ledger {}: {e}", path.display());
                return;
            }
        };

        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UndoEntry>(&line) {
                Ok(entry) => self.history.push(entry),
                Err(e) => warn!("skipping malformed ledger entry {lineno}: {e}"),
            }
        }
    }

    fn rewrite_ledger(&self) -> Result<(), UndoError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.ledger_path())?;
        for entry in &self.history {
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        Ok(())
    }

    /// Pick a name in the staging directory that does not collide with an
    /// already-staged file of the same name.
    fn unique_staged_name(&self, path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let mut candidate = self.staging_dir.join(&file_name);
        if !candidate.exists() {
            return candidate;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut counter = 1;
        loop {
            candidate = self.staging_dir.join(format!("{stem}_{counter}{ext}"));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Rename, falling back to copy-and-remove when the staging directory sits on
/// a different file system.
fn move_file(from: &Path, to: &Path) -> Result<(), UndoError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, UndoManager) {
        let files = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let manager = UndoManager::with_staging_dir(staging.path()).unwrap();
        (files, staging, manager)
    }

    #[test]
    fn delete_then_undo_restores_original_bytes() {
        let (files, _staging, mut manager) = setup();
        let path = files.path().join("photo.jpg");
        fs::write(&path, b"original pixels").unwrap();

        let entry = manager.record_delete(&path).unwrap();
        assert!(!path.exists());
        assert!(entry.staged_path.exists());
        assert_eq!(entry.size_bytes, 15);
        assert!(manager.can_undo());

        manager.undo(&entry).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"original pixels");
        assert!(!entry.staged_path.exists());
        assert!(!manager.can_undo());
    }

    #[test]
    fn deleting_missing_file_is_typed_error() {
        let (files, _staging, mut manager) = setup();
        let err = manager
            .record_delete(&files.path().join("ghost.jpg"))
            .unwrap_err();
        assert!(matches!(err, UndoError::SourceMissing { .. }));
    }

    #[test]
    fn undo_fails_when_destination_is_occupied() {
        let (files, _staging, mut manager) = setup();
        let path = files.path().join("photo.jpg");
        fs::write(&path, b"v1").unwrap();

        let entry = manager.record_delete(&path).unwrap();
        fs::write(&path, b"squatter").unwrap();

        let err = manager.undo(&entry).unwrap_err();
        assert!(matches!(err, UndoError::DestinationOccupied { .. }));
        // Nothing moved: the squatter stays, the staged copy stays, the
        // ledger still holds the entry.
        assert_eq!(fs::read(&path).unwrap(), b"squatter");
        assert!(entry.staged_path.exists());
        assert!(manager.can_undo());
    }

    #[test]
    fn undo_fails_when_staged_file_was_purged() {
        let (files, _staging, mut manager) = setup();
        let path = files.path().join("photo.jpg");
        fs::write(&path, b"v1").unwrap();

        let entry = manager.record_delete(&path).unwrap();
        fs::remove_file(&entry.staged_path).unwrap();

        let err = manager.undo(&entry).unwrap_err();
        assert!(matches!(err, UndoError::StagedFileMissing { .. }));
        assert!(manager.can_undo());
    }

    #[test]
    fn name_collisions_in_staging_get_counter_suffixes() {
        let (files, _staging, mut manager) = setup();
        let sub = files.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let a = files.path().join("photo.jpg");
        let b = sub.join("photo.jpg");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let ea = manager.record_delete(&a).unwrap();
        let eb = manager.record_delete(&b).unwrap();
        assert_ne!(ea.staged_path, eb.staged_path);
        assert!(eb
            .staged_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("photo_1"));
    }

    #[test]
    fn ledger_survives_a_new_manager_instance() {
        let (files, staging, mut manager) = setup();
        let path = files.path().join("photo.jpg");
        fs::write(&path, b"bytes").unwrap();
        let entry = manager.record_delete(&path).unwrap();
        drop(manager);

        let mut reloaded = UndoManager::with_staging_dir(staging.path()).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert_eq!(reloaded.entries()[0].id, entry.id);

        let restored = reloaded.undo_last().unwrap().unwrap();
        assert_eq!(restored.id, entry.id);
        assert_eq!(fs::read(&path).unwrap(), b"bytes");
    }

    #[test]
    fn history_is_bounded() {
        let (files, _staging, manager) = setup();
        let mut manager = manager.max_history(2);
        for i in 0..4 {
            let path = files.path().join(format!("f{i}.jpg"));
            fs::write(&path, b"x").unwrap();
            manager.record_delete(&path).unwrap();
        }
        assert_eq!(manager.entries().len(), 2);
        assert!(manager.entries()[0].original_path.ends_with("f2.jpg"));
    }

    #[test]
    fn undo_unknown_entry_is_rejected() {
        let (files, _staging, mut manager) = setup();
        let path = files.path().join("photo.jpg");
        fs::write(&path, b"x").unwrap();
        let entry = manager.record_delete(&path).unwrap();
        manager.undo(&entry).unwrap();

        let err = manager.undo(&entry).unwrap_err();
        assert!(matches!(err, UndoError::UnknownEntry { .. }));
    }
}
