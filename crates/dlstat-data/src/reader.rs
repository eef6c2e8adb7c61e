//! Package-downloads log discovery and loading.
//!
//! The live log is `<logdir>/<logname>`; rotated logs carry the ISO date of
//! the day they cover as a suffix, `<logdir>/<logname>.2013-06-01`. A log file
//! that does not exist means nobody downloaded anything that day.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use dlstat_core::classifier::classify;
use dlstat_core::error::{DlStatError, Result};
use dlstat_core::grammar::parse_line;
use dlstat_core::time_utils::DateSpec;
use tracing::{debug, warn};

use crate::aggregator::{DownloadAggregator, StatisticsSnapshot};

// ── Types ─────────────────────────────────────────────────────────────────────

/// What to do with a line that matches neither grammar alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsePolicy {
    /// Fail the whole run on the first malformed line.
    #[default]
    Abort,
    /// Log the line, count it in `skipped_lines`, and keep going.
    Skip,
}

/// A resolved log file and the day it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub path: PathBuf,
    pub date: NaiveDate,
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// Build the log path for `spec` relative to `today`.
pub fn resolve_log_path(dir: &Path, base_name: &str, spec: DateSpec, today: NaiveDate) -> LogSource {
    let date = spec.effective_date(today);
    let path = match spec {
        DateSpec::Today => dir.join(base_name),
        DateSpec::Yesterday | DateSpec::On(_) => {
            dir.join(format!("{}.{}", base_name, date.format("%Y-%m-%d")))
        }
    };
    LogSource { path, date }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Fold every line of `reader` into a fresh snapshot.
///
/// Blank lines are ignored. A read error (including invalid UTF-8) always
/// aborts; a malformed line aborts or is skipped according to `policy`.
/// Errors raised while handling a line carry its 1-based number.
pub fn aggregate_lines<R: BufRead>(
    reader: R,
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
) -> Result<StatisticsSnapshot> {
    let mut snapshot = aggregator.empty_snapshot();
    fold_lines(reader, aggregator, policy, &mut snapshot)?;
    Ok(snapshot)
}

/// Fold several log files, in order, into one snapshot. Every file must
/// exist; errors name the file they came from.
pub fn aggregate_files(
    paths: &[PathBuf],
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
) -> Result<StatisticsSnapshot> {
    let mut snapshot = aggregator.empty_snapshot();
    for path in paths {
        fold_file(path, aggregator, policy, &mut snapshot)?;
    }
    Ok(snapshot)
}

/// Statistics for the day `spec` names.
///
/// A log file that does not exist yields an empty snapshot and a warning;
/// any other failure to open or read it is returned.
pub fn collect_stats_for_date(
    dir: &Path,
    base_name: &str,
    spec: DateSpec,
    today: NaiveDate,
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
) -> Result<StatisticsSnapshot> {
    let source = resolve_log_path(dir, base_name, spec, today);
    let snapshot = match open_log(&source.path)? {
        Some(file) => read_log(&source.path, file, aggregator, policy)?,
        None => {
            warn!(
                "No logfile for {} - assuming zero downloads",
                source.date.format("%Y-%m-%d")
            );
            aggregator.empty_snapshot()
        }
    };
    Ok(snapshot.with_date(source.date))
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Open `path`, mapping "not found" to `None`.
fn open_log(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DlStatError::FileRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn fold_file(
    path: &Path,
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
    snapshot: &mut StatisticsSnapshot,
) -> Result<()> {
    let file = File::open(path).map_err(|source| DlStatError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let partial = read_log(path, file, aggregator, policy)?;
    *snapshot = std::mem::replace(snapshot, aggregator.empty_snapshot())
        .merge(partial)
        .map_err(|e| e.in_file(path))?;
    Ok(())
}

fn read_log(
    path: &Path,
    file: File,
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
) -> Result<StatisticsSnapshot> {
    let mut snapshot = aggregator.empty_snapshot();
    fold_lines(BufReader::new(file), aggregator, policy, &mut snapshot)
        .map_err(|e| e.in_file(path))?;
    debug!(
        "File {}: {} files, {} bytes, {} skipped lines",
        path.display(),
        snapshot.files,
        snapshot.bytes,
        snapshot.skipped_lines
    );
    Ok(snapshot)
}

fn fold_lines<R: BufRead>(
    reader: R,
    aggregator: &DownloadAggregator,
    policy: ParsePolicy,
    snapshot: &mut StatisticsSnapshot,
) -> Result<()> {
    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;

        let raw = match parse_line(&line) {
            Ok(raw) => raw,
            Err(e) => {
                let e = e.at_line(line_number);
                match policy {
                    ParsePolicy::Abort => return Err(e.into()),
                    ParsePolicy::Skip => {
                        warn!("Skipping malformed line: {}", e);
                        snapshot.skipped_lines += 1;
                        continue;
                    }
                }
            }
        };
        classify(&raw)
            .and_then(|event| aggregator.apply(snapshot, &event))
            .map_err(|e| e.at_line(line_number))?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
