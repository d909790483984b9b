//! JSON state file.
//!
//! Each CLI invocation loads the stored records and samples, runs one
//! command against the in-memory stores, and writes them back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ctgwatch_core::store::{MemorySeries, MemoryStore, SeriesRecord, Tables};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    tables: Tables,
    #[serde(default)]
    series: Vec<SeriesRecord>,
}

/// Stores backed by a JSON file.
#[derive(Debug)]
pub struct State {
    path: PathBuf,
    pub store: MemoryStore,
    pub series: MemorySeries,
}

impl State {
    /// Load the state file, starting empty if it does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!(path = %path.display(), "No state file, starting empty");
            StateDocument::default()
        };

        Ok(Self {
            path,
            store: MemoryStore::from_tables(document.tables),
            series: MemorySeries::from_records(document.series),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the state back, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        let document = StateDocument {
            tables: self.store.snapshot(),
            series: self.series.records(),
        };
        let json = serde_json::to_string(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ctgwatch_core::store::{SeriesStore, Store};
    use ctgwatch_types::{Channel, HospitalId, Measurement, Sample};

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = State::load(dir.path().join("state.json")).unwrap();
        assert!(state.store.snapshot().measurements.is_empty());
        assert!(state.series.records().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc.with_ymd_and_hms(2021, 12, 1, 16, 0, 0).unwrap();

        let state = State::load(&path).unwrap();
        let mut tx = state.store.begin().unwrap();
        let m = tx
            .insert_measurement(Measurement::new(HospitalId(1), "TRC-P01", now))
            .unwrap();
        tx.commit().unwrap();
        state
            .series
            .insert(m.id, Channel::HeartRate, &[Sample::new(140, now)])
            .unwrap();
        state.save().unwrap();

        let reloaded = State::load(&path).unwrap();
        assert_eq!(reloaded.store.snapshot(), state.store.snapshot());
        assert_eq!(reloaded.series.records(), state.series.records());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(State::load(&path).is_err());
    }
}
