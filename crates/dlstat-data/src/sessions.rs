//! Transfer-session statistics that accompany the package-download counts.
//!
//! The transfer service keeps per-day session counters (sessions, distinct
//! users and bytes for each final status) plus completed-file counts for the
//! unprocessed and preprocessed archives. They are exported as a JSON object
//! keyed by ISO date:
//!
//! ```json
//! {
//!   "2013-06-01": { "completed_sessions": 12, "completed_users": 4, "unproc_completed": 7 }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use dlstat_core::error::{DlStatError, Result};
use dlstat_core::formatting::{csv_line, row_cells, stats_columns, ValueMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Final statuses a transfer session can end in.
pub const STATUSES: [&str; 3] = ["completed", "cancelled", "error"];

/// Completed-file counters merged into the packages sheet.
pub const COMPLETED_FILE_KEYS: [&str; 2] = ["unproc_completed", "preproc_completed"];

// ── SessionStats ──────────────────────────────────────────────────────────────

/// Session counters for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub date: NaiveDate,
    pub counters: BTreeMap<String, u64>,
}

impl SessionStats {
    /// Every documented counter set to zero.
    pub fn zero(date: NaiveDate) -> Self {
        let counters = documented_keys().into_iter().map(|k| (k, 0)).collect();
        Self { date, counters }
    }

    /// Zero-filled stats overlaid with `counters`.
    pub fn from_counters(date: NaiveDate, counters: BTreeMap<String, u64>) -> Self {
        let mut stats = Self::zero(date);
        stats.counters.extend(counters);
        stats
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// The completed-file counters only, for merging into a package row.
    pub fn completed_files(&self) -> ValueMap {
        COMPLETED_FILE_KEYS
            .iter()
            .map(|k| (k.to_string(), self.get(k).into()))
            .collect()
    }

    pub fn to_value_map(&self) -> ValueMap {
        let mut values: ValueMap = self
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), (*v).into()))
            .collect();
        values.insert("date".to_string(), self.date.into());
        values
    }

    /// The stats-sheet CSV row.
    pub fn csv_row(&self) -> Result<String> {
        csv_line(&row_cells(&stats_columns(), &self.to_value_map()))
    }
}

/// `{status}_sessions`, `{status}_users`, `{status}_bytes` per status, then
/// the completed-file counters.
pub fn documented_keys() -> Vec<String> {
    let mut keys: Vec<String> = STATUSES
        .iter()
        .flat_map(|status| {
            ["sessions", "users", "bytes"]
                .iter()
                .map(move |what| format!("{}_{}", status, what))
        })
        .collect();
    keys.extend(COMPLETED_FILE_KEYS.iter().map(|k| k.to_string()));
    keys
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// Anything that can produce the session counters for a day.
pub trait SessionStatsSource {
    fn stats_for(&self, date: NaiveDate) -> Result<SessionStats>;
}

/// Session counters loaded from a JSON export.
#[derive(Debug, Clone, Default)]
pub struct JsonSessionStatsSource {
    days: BTreeMap<String, BTreeMap<String, u64>>,
}

impl JsonSessionStatsSource {
    pub fn open(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| DlStatError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let days: BTreeMap<String, BTreeMap<String, u64>> =
            serde_json::from_str(&content).map_err(|e| DlStatError::from(e).in_file(path))?;
        debug!("Loaded session stats for {} days from {}", days.len(), path.display());
        Ok(Self { days })
    }
}

impl SessionStatsSource for JsonSessionStatsSource {
    fn stats_for(&self, date: NaiveDate) -> Result<SessionStats> {
        let key = date.format("%Y-%m-%d").to_string();
        let counters = self.days.get(&key).cloned().unwrap_or_default();
        if counters.is_empty() {
            debug!("No session stats for {}", key);
        }
        Ok(SessionStats::from_counters(date, counters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_json(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("sessions.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_documented_keys() {
        let keys = documented_keys();
        assert_eq!(keys.len(), 11);
        assert_eq!(keys[0], "completed_sessions");
        assert_eq!(keys[8], "error_bytes");
        assert_eq!(keys[10], "preproc_completed");
    }

    #[test]
    fn test_stats_for_known_date() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            r#"{"2013-06-01": {"completed_sessions": 12, "completed_users": 4, "unproc_completed": 7}}"#,
        );
        let source = JsonSessionStatsSource::open(&path).unwrap();
        let stats = source.stats_for(ymd(2013, 6, 1)).unwrap();
        assert_eq!(stats.get("completed_sessions"), 12);
        assert_eq!(stats.get("unproc_completed"), 7);
        assert_eq!(stats.get("error_users"), 0);
        assert_eq!(stats.counters.len(), 11);
    }

    #[test]
    fn test_stats_for_unknown_date_is_zero() {
        let dir = TempDir::new().unwrap();
        let path = write_json(&dir, "{}");
        let source = JsonSessionStatsSource::open(&path).unwrap();
        let stats = source.stats_for(ymd(2013, 6, 1)).unwrap();
        assert_eq!(stats, SessionStats::zero(ymd(2013, 6, 1)));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = JsonSessionStatsSource::open(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(DlStatError::FileRead { .. })));
    }

    #[test]
    fn test_open_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = write_json(&dir, "{\"2013-06-01\": [1, 2]}");
        let result = JsonSessionStatsSource::open(&path);
        match result {
            Err(DlStatError::InFile { path: at, source }) => {
                assert_eq!(at, path);
                assert!(matches!(*source, DlStatError::JsonParse(_)));
            }
            other => panic!("expected JSON error naming the file, got {:?}", other),
        }
    }

    #[test]
    fn test_csv_row_layout() {
        let mut counters = BTreeMap::new();
        counters.insert("completed_sessions".to_string(), 12);
        counters.insert("completed_users".to_string(), 4);
        counters.insert("completed_bytes".to_string(), 1000);
        counters.insert("cancelled_sessions".to_string(), 1);
        counters.insert("error_users".to_string(), 2);
        let stats = SessionStats::from_counters(ymd(2013, 6, 1), counters);
        assert_eq!(stats.csv_row().unwrap(), "2013-06-01,12,4,1000,,1,0,,0,2");
    }

    #[test]
    fn test_completed_files_only_has_file_counters() {
        let mut counters = BTreeMap::new();
        counters.insert("preproc_completed".to_string(), 3);
        counters.insert("completed_sessions".to_string(), 9);
        let stats = SessionStats::from_counters(ymd(2013, 6, 1), counters);
        let files = stats.completed_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files.get("preproc_completed"), Some(&3u64.into()));
        assert_eq!(files.get("unproc_completed"), Some(&0u64.into()));
    }
}
