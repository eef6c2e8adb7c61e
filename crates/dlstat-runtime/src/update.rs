//! Daily reporting-workbook update.
//!
//! Brings the packages and stats worksheets up to date: starting the day
//! after their common last date and stopping before today, each day gets one
//! packages row (log statistics plus completed-transfer file counts) and one
//! stats row (transfer-session counters). Every row is computed before either
//! worksheet is written, so a failure on any day leaves both unchanged.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use dlstat_core::bundles::CountedResource;
use dlstat_core::error::{DlStatError, Result};
use dlstat_core::formatting::{package_sheet_columns, stats_columns, ValueMap};
use dlstat_core::time_utils::{days_between, DateSpec};
use dlstat_data::aggregator::DownloadAggregator;
use dlstat_data::reader::{collect_stats_for_date, ParsePolicy};
use dlstat_data::sessions::SessionStatsSource;
use tracing::{debug, info};

use crate::sheet::SheetWriter;

// ── UpdateSummary ─────────────────────────────────────────────────────────────

/// Outcome of one update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Common last date of both worksheets before the run.
    pub previous_last_date: NaiveDate,
    /// Days appended, in order.
    pub appended: Vec<NaiveDate>,
}

impl UpdateSummary {
    pub fn appended_days(&self) -> usize {
        self.appended.len()
    }
}

// ── UpdateDriver ──────────────────────────────────────────────────────────────

/// Appends missing days to the reporting worksheets.
pub struct UpdateDriver<S> {
    logdir: PathBuf,
    logname: String,
    aggregator: DownloadAggregator,
    counted: Option<CountedResource>,
    sessions: S,
    policy: ParsePolicy,
}

impl<S: SessionStatsSource> UpdateDriver<S> {
    pub fn new(
        logdir: &Path,
        logname: &str,
        aggregator: DownloadAggregator,
        counted: Option<CountedResource>,
        sessions: S,
    ) -> Self {
        Self {
            logdir: logdir.to_path_buf(),
            logname: logname.to_string(),
            aggregator,
            counted,
            sessions,
            policy: ParsePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ParsePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Common last date of both worksheets.
    ///
    /// Fails with [`DlStatError::DateMismatch`] when they disagree; the
    /// workbook then needs fixing by hand before it can be updated.
    pub fn last_common_date(
        &self,
        stats: &dyn SheetWriter,
        packages: &dyn SheetWriter,
    ) -> Result<NaiveDate> {
        let stats_date = stats.last_date()?;
        let packages_date = packages.last_date()?;
        if stats_date != packages_date {
            return Err(DlStatError::DateMismatch {
                first_sheet: stats.name().to_string(),
                first_date: stats_date.format("%Y-%m-%d").to_string(),
                second_sheet: packages.name().to_string(),
                second_date: packages_date.format("%Y-%m-%d").to_string(),
            });
        }
        Ok(stats_date)
    }

    /// Append one row per missing day to each worksheet, up to but
    /// excluding `today`.
    pub fn run(
        &self,
        stats: &mut dyn SheetWriter,
        packages: &mut dyn SheetWriter,
        today: NaiveDate,
    ) -> Result<UpdateSummary> {
        let last = self.last_common_date(&*stats, &*packages)?;
        debug!("Worksheets are complete through {}", last);

        let rows = days_between(last, today)
            .map(|day| self.rows_for(day, today))
            .collect::<Result<Vec<_>>>()?;

        let package_columns =
            package_sheet_columns(self.aggregator.registry(), self.counted.as_ref());
        let session_columns = stats_columns();
        for row in &rows {
            packages.append_row(&package_columns, &row.packages)?;
            stats.append_row(&session_columns, &row.sessions)?;
        }
        packages.stage()?;
        stats.stage()?;
        packages.commit()?;
        stats.commit()?;

        let appended: Vec<NaiveDate> = rows.iter().map(|row| row.day).collect();
        if let Some(newest) = appended.last() {
            info!("Worksheets now complete through {}", newest);
        }
        Ok(UpdateSummary {
            previous_last_date: last,
            appended,
        })
    }

    fn rows_for(&self, day: NaiveDate, today: NaiveDate) -> Result<DayRows> {
        let snapshot = collect_stats_for_date(
            &self.logdir,
            &self.logname,
            DateSpec::On(day),
            today,
            &self.aggregator,
            self.policy,
        )?;
        let session = self.sessions.stats_for(day)?;

        let mut package_values = snapshot.to_value_map(self.counted.as_slice());
        package_values.extend(session.completed_files());

        info!(
            "Collected {}: {} files, {} completed sessions",
            day,
            snapshot.files,
            session.get("completed_sessions")
        );
        Ok(DayRows {
            day,
            packages: package_values,
            sessions: session.to_value_map(),
        })
    }
}

/// Both worksheet rows for one day.
struct DayRows {
    day: NaiveDate,
    packages: ValueMap,
    sessions: ValueMap,
}
