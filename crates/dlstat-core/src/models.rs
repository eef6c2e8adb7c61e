use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Calendar date of a log line, kept as the digits that were written.
///
/// The grammar only checks digit counts, so `2013-13-45` is a syntactically
/// valid log date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogDate {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// Wall-clock time of a log line. `millis` may have any number of digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogTime {
    pub hour: String,
    pub minute: String,
    pub second: String,
    pub millis: String,
}

/// A bulk request for one or more packages across a set of subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEvent {
    pub date: LogDate,
    pub time: LogTime,
    pub login: String,
    /// Requested package names in log order; duplicates are kept.
    pub packages: Vec<String>,
    /// Unique subject identifiers.
    pub subjects: BTreeSet<String>,
    pub bytes_requested: u64,
}

impl PackageEvent {
    /// Individual files this request stands for: one per package per subject.
    pub fn file_count(&self) -> u64 {
        (self.subjects.len() as u64) * (self.packages.len() as u64)
    }
}

/// A single file downloaded from a project resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub date: LogDate,
    pub time: LogTime,
    pub login: String,
    pub filename: String,
    pub project: String,
    pub resource: String,
    pub bytes_requested: u64,
}

/// One classified line of the package-downloads log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogEvent {
    Package(PackageEvent),
    Resource(ResourceEvent),
}

impl LogEvent {
    pub fn bytes_requested(&self) -> u64 {
        match self {
            LogEvent::Package(e) => e.bytes_requested,
            LogEvent::Resource(e) => e.bytes_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: &str, m: &str, d: &str) -> LogDate {
        LogDate {
            year: y.to_string(),
            month: m.to_string(),
            day: d.to_string(),
        }
    }

    #[test]
    fn test_package_event_file_count() {
        let event = PackageEvent {
            date: date("2013", "06", "01"),
            time: LogTime {
                hour: "00".to_string(),
                minute: "00".to_string(),
                second: "00".to_string(),
                millis: "0".to_string(),
            },
            login: "u".to_string(),
            packages: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            subjects: ["S1", "S2"].iter().map(|s| s.to_string()).collect(),
            bytes_requested: 1,
        };
        assert_eq!(event.file_count(), 6);
    }
}
