use chrono::{Days, NaiveDate, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use tracing::warn;

use crate::error::DlStatError;

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Parse an IANA timezone name, falling back to UTC with a warning.
pub fn parse_timezone(tz_name: &str) -> Tz {
    tz_name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(
            "unrecognised timezone \"{}\", falling back to UTC",
            tz_name
        );
        Tz::UTC
    })
}

/// Current calendar date in `tz_name`, or in the system timezone when `None`.
///
/// The log rotates at local midnight on the server, so "today" must be the
/// server's date rather than UTC's.
pub fn today_in(tz_name: Option<&str>) -> NaiveDate {
    let name = tz_name
        .map(str::to_string)
        .unwrap_or_else(get_system_timezone);
    Utc::now().with_timezone(&parse_timezone(&name)).date_naive()
}

// ── DateSpec ──────────────────────────────────────────────────────────────────

/// Which day's log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    /// The live, not yet rotated log.
    Today,
    /// The most recently rotated log.
    Yesterday,
    /// A rotated log for an explicit date.
    On(NaiveDate),
}

impl DateSpec {
    /// Calendar date this specifier denotes, given the current date.
    pub fn effective_date(self, today: NaiveDate) -> NaiveDate {
        match self {
            DateSpec::Today => today,
            DateSpec::Yesterday => today.pred_opt().unwrap_or(today),
            DateSpec::On(date) => date,
        }
    }
}

impl FromStr for DateSpec {
    type Err = DlStatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(DateSpec::Today),
            "yesterday" => Ok(DateSpec::Yesterday),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(DateSpec::On)
                .map_err(|_| DlStatError::InvalidDate(other.to_string())),
        }
    }
}

// ── Date ranges ───────────────────────────────────────────────────────────────

/// Every date strictly after `after` and strictly before `before`.
pub fn days_between(after: NaiveDate, before: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(after.checked_add_days(Days::new(1)), |d| {
        d.checked_add_days(Days::new(1))
    })
    .take_while(move |d| *d < before)
}
