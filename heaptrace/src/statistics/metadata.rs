//! Persisted results of a previous run.
//!
//! The metadata directory holds `statistics.json` and exported trees under
//! `trees/<name>.json`. Anything unreadable is a stale cache: it is logged and
//! reported as absent so the caller derives the data again.
//!
//! Statistics are stamped with a [`TraceFingerprint`] of the trace they were
//! derived from; a cache written for another trace, or for an older version
//! of the same file, is stale as well.

use crate::domain::{ExportError, MetadataError};
use crate::export::{self, ExportFormat};
use crate::grouping::ClassificationTree;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::model::Statistics;

/// Bumped whenever the statistics record layout changes.
pub const METADATA_VERSION: u32 = 3;

const STATISTICS_FILE: &str = "statistics.json";
const TREES_DIR: &str = "trees";

/// Identity of a trace file: where it lives, how long it is and when it was
/// last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFingerprint {
    pub path: String,
    pub len: u64,
    /// Nanoseconds since the epoch; absent where the platform has no mtime
    pub modified: Option<u64>,
}

impl TraceFingerprint {
    /// # Errors
    ///
    /// IO failures reading the file's metadata.
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|since| u64::try_from(since.as_nanos()).ok());
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self { path: path.display().to_string(), len: meta.len(), modified })
    }
}

impl fmt::Display for TraceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes", self.path, self.len)?;
        if let Some(modified) = self.modified {
            write!(f, ", modified at {modified}")?;
        }
        write!(f, ")")
    }
}

#[derive(Serialize, Deserialize)]
struct StatisticsFile {
    version: u32,
    trace: TraceFingerprint,
    statistics: Vec<Statistics>,
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// # Errors
    ///
    /// IO or serialisation failures while writing.
    pub fn write_statistics(&self, statistics: &[Statistics], trace: &TraceFingerprint) -> Result<(), MetadataError> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.dir.join(STATISTICS_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(
            &mut writer,
            &StatisticsFile { version: METADATA_VERSION, trace: trace.clone(), statistics: statistics.to_vec() },
        )?;
        writer.flush()?;
        debug!("Wrote {} statistics records to {}", statistics.len(), self.dir.display());
        Ok(())
    }

    /// Statistics previously derived from `trace`, `None` when they must be
    /// recomputed.
    #[must_use]
    pub fn read_statistics(&self, trace: &TraceFingerprint) -> Option<Vec<Statistics>> {
        match self.load_statistics(trace) {
            Ok(statistics) => Some(statistics),
            Err(MetadataError::Missing(path)) => {
                debug!("No cached statistics at {path}");
                None
            }
            Err(e) => {
                warn!("Ignoring stale statistics cache: {e}");
                None
            }
        }
    }

    fn load_statistics(&self, trace: &TraceFingerprint) -> Result<Vec<Statistics>, MetadataError> {
        let path = self.dir.join(STATISTICS_FILE);
        if !path.exists() {
            return Err(MetadataError::Missing(path.display().to_string()));
        }
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(&path)?))
            .map_err(|e| MetadataError::Corrupt(e.to_string()))?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| MetadataError::Corrupt("missing version".to_string()))?;
        if found != u64::from(METADATA_VERSION) {
            return Err(MetadataError::VersionMismatch {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                expected: METADATA_VERSION,
            });
        }
        let file: StatisticsFile = serde_json::from_value(value)?;
        if file.trace != *trace {
            return Err(MetadataError::TraceMismatch {
                cached: file.trace.to_string(),
                current: trace.to_string(),
            });
        }
        Ok(file.statistics)
    }

    /// # Errors
    ///
    /// IO or serialisation failures while writing.
    pub fn write_tree(&self, name: &str, tree: &ClassificationTree) -> Result<(), ExportError> {
        let dir = self.dir.join(TREES_DIR);
        fs::create_dir_all(&dir)?;
        export::export_to_file(tree, ExportFormat::SelfDescribing, &dir.join(format!("{name}.json")))
    }

    /// Tree stored under `name`, `None` when missing or unreadable.
    #[must_use]
    pub fn read_tree(&self, name: &str) -> Option<ClassificationTree> {
        let path = self.dir.join(TREES_DIR).join(format!("{name}.json"));
        if !path.exists() {
            debug!("No cached tree '{name}'");
            return None;
        }
        match export::import_from_file(&path) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!("Ignoring stale tree cache '{name}': {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::SpaceTotals;

    fn record(reachable: u64) -> Statistics {
        Statistics { boundary: None, spaces: SpaceTotals::default(), reachable_bytes: Some(reachable) }
    }

    fn fingerprint(len: u64) -> TraceFingerprint {
        TraceFingerprint { path: "/traces/shop.trace".to_string(), len, modified: Some(1_700_000_000) }
    }

    #[test]
    fn test_statistics_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write_statistics(&[record(1), record(2)], &fingerprint(64)).unwrap();
        assert_eq!(store.read_statistics(&fingerprint(64)), Some(vec![record(1), record(2)]));
    }

    #[test]
    fn test_statistics_of_another_trace_are_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write_statistics(&[record(1)], &fingerprint(64)).unwrap();

        assert!(matches!(
            store.load_statistics(&fingerprint(65)),
            Err(MetadataError::TraceMismatch { .. })
        ));
        let moved = TraceFingerprint { path: "/traces/other.trace".to_string(), ..fingerprint(64) };
        assert_eq!(store.read_statistics(&moved), None);
        let touched = TraceFingerprint { modified: Some(1_700_000_001), ..fingerprint(64) };
        assert_eq!(store.read_statistics(&touched), None);
    }

    #[test]
    fn test_fingerprint_of_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.trace");
        fs::write(&path, "{}\n").unwrap();
        let first = TraceFingerprint::of(&path).unwrap();
        assert_eq!(first.len, 3);
        assert!(Path::new(&first.path).is_absolute());

        fs::write(&path, "{}\n{}\n").unwrap();
        assert_ne!(TraceFingerprint::of(&path).unwrap(), first);
        assert!(TraceFingerprint::of(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_version_mismatch_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        fs::write(dir.path().join(STATISTICS_FILE), r#"{"version": 1, "statistics": []}"#).unwrap();
        assert!(matches!(
            store.load_statistics(&fingerprint(64)),
            Err(MetadataError::VersionMismatch { found: 1, expected: METADATA_VERSION })
        ));
        assert_eq!(store.read_statistics(&fingerprint(64)), None);
    }

    #[test]
    fn test_missing_and_corrupt_are_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("absent"));
        assert_eq!(store.read_statistics(&fingerprint(64)), None);
        assert!(store.read_tree("Type").is_none());

        let store = MetadataStore::new(dir.path());
        fs::write(dir.path().join(STATISTICS_FILE), "{ not json").unwrap();
        assert!(matches!(store.load_statistics(&fingerprint(64)), Err(MetadataError::Corrupt(_))));
        assert_eq!(store.read_statistics(&fingerprint(64)), None);
    }
}
