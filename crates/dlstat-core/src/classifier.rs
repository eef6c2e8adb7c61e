//! Turns a [`RawRecord`] from the grammar into a typed [`LogEvent`].

use crate::error::{DlStatError, Result};
use crate::grammar::{parse_line, RawRecord};
use crate::models::{LogDate, LogEvent, LogTime, PackageEvent, ResourceEvent};

/// Build a [`LogEvent`] from a matched record.
///
/// A record with a `packages` field is a package event; anything else is a
/// resource event. The byte count has no upper bound in the grammar, so a
/// value that does not fit in `u64` is reported as
/// [`DlStatError::Overflow`].
pub fn classify(raw: &RawRecord<'_>) -> Result<LogEvent> {
    let date = LogDate {
        year: raw.date[0].to_string(),
        month: raw.date[1].to_string(),
        day: raw.date[2].to_string(),
    };
    let time = LogTime {
        hour: raw.time[0].to_string(),
        minute: raw.time[1].to_string(),
        second: raw.time[2].to_string(),
        millis: raw.time[3].to_string(),
    };
    let bytes_requested = parse_byte_count(raw.bytes_requested)?;

    if let Some(packages) = &raw.packages {
        let subjects = raw
            .subjects
            .as_ref()
            .ok_or(DlStatError::MissingField("subjects"))?;
        return Ok(LogEvent::Package(PackageEvent {
            date,
            time,
            login: raw.login.to_string(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            bytes_requested,
        }));
    }

    Ok(LogEvent::Resource(ResourceEvent {
        date,
        time,
        login: raw.login.to_string(),
        filename: raw
            .filename
            .ok_or(DlStatError::MissingField("filename"))?
            .to_string(),
        project: raw
            .project
            .ok_or(DlStatError::MissingField("project"))?
            .to_string(),
        resource: raw
            .resource
            .ok_or(DlStatError::MissingField("resource"))?
            .to_string(),
        bytes_requested,
    }))
}

/// Parse one line and classify it in a single step.
pub fn parse_event(line: &str) -> Result<LogEvent> {
    let raw = parse_line(line)?;
    classify(&raw)
}

fn parse_byte_count(digits: &str) -> Result<u64> {
    digits.parse::<u64>().map_err(|_| DlStatError::Overflow {
        field: "bytes_requested",
        value: digits.to_string(),
    })
}
