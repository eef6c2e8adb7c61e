//! Package-name patterns that are counted separately in the statistics.

use regex::Regex;
use std::sync::OnceLock;

/// Processing level encoded in a package name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    Unproc,
    Preproc,
}

impl PackageType {
    pub const ALL: [PackageType; 2] = [PackageType::Unproc, PackageType::Preproc];

    /// Substring searched for in package names; also the statistic's key.
    pub fn key(self) -> &'static str {
        match self {
            PackageType::Unproc => "unproc",
            PackageType::Preproc => "preproc",
        }
    }

    /// `true` when `package` contains this type's substring anywhere,
    /// ignoring case. Repeated occurrences still count as one match.
    pub fn matches(self, package: &str) -> bool {
        self.pattern().is_match(package)
    }

    fn pattern(self) -> &'static Regex {
        static UNPROC: OnceLock<Regex> = OnceLock::new();
        static PREPROC: OnceLock<Regex> = OnceLock::new();
        let cell = match self {
            PackageType::Unproc => &UNPROC,
            PackageType::Preproc => &PREPROC,
        };
        cell.get_or_init(|| {
            Regex::new(&format!("(?i){}", regex::escape(self.key())))
                .unwrap_or_else(|_| unreachable!("escaped literal is a valid pattern"))
        })
    }
}
