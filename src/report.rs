use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duplicate::DuplicateGroup;
use crate::record::ExtractFailure;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV export failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Aggregate counters for one completed scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// Candidate files found during discovery.
    pub files_discovered: usize,
    /// Files with a valid fingerprint.
    pub files_fingerprinted: usize,
    /// Files whose extraction failed.
    pub files_failed: usize,
    /// Non-representative members across all groups.
    pub duplicate_files: usize,
    /// Bytes freed by deleting every non-representative member.
    pub reclaimable_bytes: u64,
    /// Fingerprints served from the cache instead of recomputed.
    pub cache_hits: usize,
}

/// The final product of a scan: ordered duplicate groups plus everything the
/// host needs to explain what happened. Built once, never mutated; a re-scan
/// replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub stats: ScanStats,
    pub failures: Vec<ExtractFailure>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    group_id: usize,
    kind: &'a str,
    representative: &'a str,
    member: &'a str,
    width: Option<u32>,
    height: Option<u32>,
    size_bytes: u64,
    group_reclaimable_bytes: u64,
}

impl DuplicateReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn export(&self, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
        match format {
            ExportFormat::Csv => self.to_csv(),
            ExportFormat::Json => self.to_json(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ExportError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// One row per group member, representative first.
    pub fn to_csv(&self) -> Result<Vec<u8>, ExportError> {
        let mut buf = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut buf);
            for group in &self.groups {
                let kind = match group.kind {
                    crate::duplicate::DuplicateKind::Exact => "exact",
                    crate::duplicate::DuplicateKind::Similar => "similar",
                };
                let representative = group.representative().path.to_string_lossy();
                for member in &group.members {
                    writer.serialize(CsvRow {
                        group_id: group.id,
                        kind,
                        representative: representative.as_ref(),
                        member: member.path.to_string_lossy().as_ref(),
                        width: member.width,
                        height: member.height,
                        size_bytes: member.size_bytes,
                        group_reclaimable_bytes: group.reclaimable_bytes,
                    })?;
                }
            }
            writer.flush()?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicate::DuplicateKind;
    use crate::fingerprint::Fingerprint;
    use crate::record::ImageRecord;
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample_report() -> DuplicateReport {
        let mk = |path: &str, size: u64| ImageRecord {
            path: PathBuf::from(path),
            size_bytes: size,
            modified: Utc::now(),
            width: Some(800),
            height: Some(600),
            format: Some("JPEG".into()),
            fingerprint: Some(Fingerprint(0xabcd)),
            failure: None,
        };
        DuplicateReport {
            groups: vec![DuplicateGroup {
                id: 1,
                kind: DuplicateKind::Similar,
                members: vec![mk("/photos/keep.jpg", 2048), mk("/photos/dupe.jpg", 1024)],
                reclaimable_bytes: 1024,
            }],
            stats: ScanStats {
                files_discovered: 3,
                files_fingerprinted: 2,
                files_failed: 1,
                duplicate_files: 1,
                reclaimable_bytes: 1024,
                cache_hits: 0,
            },
            failures: vec![],
        }
    }

    #[test]
    fn csv_has_header_and_one_row_per_member() {
        let csv = String::from_utf8(sample_report().to_csv().unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("group_id,kind,representative,member"));
        assert!(lines[1].contains("/photos/keep.jpg"));
        assert!(lines[2].contains("/photos/dupe.jpg"));
        assert!(lines[2].contains("similar"));
        assert!(lines[2].contains("1024"));
    }

    #[test]
    fn json_round_trips() {
        let report = sample_report();
        let json = report.to_json().unwrap();
        let parsed: DuplicateReport = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.groups[0].id, 1);
        assert_eq!(parsed.stats.reclaimable_bytes, 1024);
        assert_eq!(
            parsed.groups[0].representative().path,
            PathBuf::from("/photos/keep.jpg")
        );
    }
}
