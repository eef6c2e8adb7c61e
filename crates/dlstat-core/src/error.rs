use std::path::PathBuf;
use thiserror::Error;

use crate::grammar::ParseError;

/// All errors produced by the download-statistics crates.
#[derive(Error, Debug)]
pub enum DlStatError {
    /// A log line matched neither grammar alternative.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A numeric field does not fit the target integer type.
    #[error("Value out of range for field {field}: {value}")]
    Overflow { field: &'static str, value: String },

    /// A raw record is missing a field its variant requires.
    #[error("Missing field in raw record: {0}")]
    MissingField(&'static str),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be written to disk.
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error raised while handling one line of a log.
    #[error("line {line_number}: {source}")]
    AtLine {
        line_number: usize,
        #[source]
        source: Box<DlStatError>,
    },

    /// An error raised while handling the contents of a file.
    #[error("{}: {source}", .path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<DlStatError>,
    },

    /// A date specifier was not `today`, `yesterday` or `yyyy-mm-dd`.
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A TOML configuration document could not be parsed.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Two worksheets disagree about the last reported date.
    #[error(
        "last date of {first_sheet} ({first_date}) != last date of {second_sheet} ({second_date}); manual intervention is required"
    )]
    DateMismatch {
        first_sheet: String,
        first_date: String,
        second_sheet: String,
        second_date: String,
    },

    /// A worksheet row could not be read or written as CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A worksheet is malformed or cannot be written.
    #[error("Worksheet error: {0}")]
    Sheet(String),

    /// A record violates a column constraint of its destination table.
    #[error("Constraint violation on {column}: {reason}")]
    Constraint { column: &'static str, reason: String },

    /// An external HTTP lookup failed.
    #[error("HTTP lookup failed: {0}")]
    Http(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DlStatError {
    /// Attach the 1-based log line number. Parse errors carry it already.
    pub fn at_line(self, line_number: usize) -> Self {
        match self {
            DlStatError::Parse(e) => DlStatError::Parse(e.at_line(line_number)),
            other => DlStatError::AtLine {
                line_number,
                source: Box::new(other),
            },
        }
    }

    /// Attach the file being processed. Errors that already name a file are
    /// returned unchanged.
    pub fn in_file(self, path: &std::path::Path) -> Self {
        match self {
            DlStatError::Io(source) => DlStatError::FileRead {
                path: path.to_path_buf(),
                source,
            },
            e @ (DlStatError::FileRead { .. }
            | DlStatError::FileWrite { .. }
            | DlStatError::InFile { .. }) => e,
            other => DlStatError::InFile {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}

/// Convenience alias used throughout the dlstat crates.
pub type Result<T> = std::result::Result<T, DlStatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DlStatError::FileRead {
            path: PathBuf::from("/var/log/xnat/package-downloads.log"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("package-downloads.log"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_error_display_overflow() {
        let err = DlStatError::Overflow {
            field: "bytes_requested",
            value: "99999999999999999999999".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Value out of range for field bytes_requested: 99999999999999999999999"
        );
    }

    #[test]
    fn test_error_display_invalid_date() {
        let err = DlStatError::InvalidDate("tomorrow".to_string());
        assert_eq!(err.to_string(), "Invalid date: tomorrow");
    }

    #[test]
    fn test_error_display_date_mismatch() {
        let err = DlStatError::DateMismatch {
            first_sheet: "stats".to_string(),
            first_date: "2013-06-01".to_string(),
            second_sheet: "packages".to_string(),
            second_date: "2013-05-31".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("last date of stats (2013-06-01) != last date of packages"));
        assert!(msg.contains("manual intervention"));
    }

    #[test]
    fn test_error_display_constraint() {
        let err = DlStatError::Constraint {
            column: "country_code",
            reason: "value longer than 2 characters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Constraint violation on country_code: value longer than 2 characters"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::other("is a directory");
        let err: DlStatError = io_err.into();
        assert!(err.to_string().contains("is a directory"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: DlStatError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }

    #[test]
    fn test_at_line_wraps_non_parse_errors() {
        let err = DlStatError::Overflow {
            field: "bytes_requested",
            value: "99999999999999999999".to_string(),
        }
        .at_line(2);
        assert_eq!(
            err.to_string(),
            "line 2: Value out of range for field bytes_requested: 99999999999999999999"
        );
    }

    #[test]
    fn test_at_line_keeps_parse_errors_flat() {
        let parse = crate::grammar::parse_line("garbage").unwrap_err();
        match DlStatError::from(parse).at_line(7) {
            DlStatError::Parse(e) => assert_eq!(e.line_number, Some(7)),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_in_file_names_the_file() {
        let path = PathBuf::from("/logs/package-downloads.log.2013-06-01");
        let err = DlStatError::MissingField("project").at_line(3).in_file(&path);
        assert_eq!(
            err.to_string(),
            "/logs/package-downloads.log.2013-06-01: line 3: Missing field in raw record: project"
        );

        let io = DlStatError::Io(std::io::Error::other("boom")).in_file(&path);
        assert!(matches!(io, DlStatError::FileRead { .. }));
    }
}
