//! Duplicate-detection engine for image collections.
//!
//! Scans a folder tree, fingerprints every image with a perceptual hash,
//! clusters visually similar files with union-find, and produces an ordered
//! [`DuplicateReport`] a UI or CLI can act on. Deletions go through the
//! [`UndoManager`], which stages files instead of destroying them.
//!
//! ```no_run
//! use imgdedup::{ScanConfig, Scanner};
//!
//! let scanner = Scanner::new(ScanConfig::new("/photos").max_distance(10));
//! let report = scanner.scan_blocking()?;
//! for group in &report.groups {
//!     println!(
//!         "group {}: keep {}, {} duplicate(s)",
//!         group.id,
//!         group.representative().path.display(),
//!         group.duplicates().len()
//!     );
//! }
//! # Ok::<(), imgdedup::ScanError>(())
//! ```

pub mod cache;
pub mod config;
pub mod duplicate;
pub mod fingerprint;
pub mod hash;
pub mod record;
pub mod report;
pub mod scanner;
pub mod undo;

pub use cache::{CacheError, HashCache};
pub use config::{ScanConfig, DEFAULT_EXTENSIONS, DEFAULT_MAX_DISTANCE};
pub use duplicate::{DuplicateGroup, DuplicateKind};
pub use fingerprint::{Fingerprint, FingerprintAlgorithm, FingerprintError, Fingerprinter};
pub use record::{ExtractFailure, FailureKind, ImageRecord};
pub use report::{DuplicateReport, ExportError, ExportFormat, ScanStats};
pub use scanner::{ScanError, ScanHandle, ScanPhase, ScanProgress, Scanner};
pub use undo::{OperationKind, UndoEntry, UndoError, UndoManager};
