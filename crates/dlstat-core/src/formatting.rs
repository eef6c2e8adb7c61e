//! Flat-row rendering shared by the CSV output and the workbook writer.
//!
//! A row is described by an ordered list of columns, each either a name or a
//! blank placeholder, and filled from a [`ValueMap`]. Placeholders and names
//! without a value render as empty cells.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::bundles::{BundleRegistry, CountedResource};
use crate::error::{DlStatError, Result};

// ── Cell values ───────────────────────────────────────────────────────────────

/// One cell of a statistics row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Date(NaiveDate),
    Count(u64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Count(n) => write!(f, "{}", n),
        }
    }
}

impl From<u64> for CellValue {
    fn from(n: u64) -> Self {
        CellValue::Count(n)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d)
    }
}

/// Named statistics for one date, keyed by column name.
pub type ValueMap = BTreeMap<String, CellValue>;

/// A column of a row layout: `None` is a blank placeholder.
pub type Column = Option<String>;

// ── Layouts ───────────────────────────────────────────────────────────────────

fn named(name: &str) -> Column {
    Some(name.to_string())
}

/// Column order of the transfer-session statistics sheet.
pub fn stats_columns() -> Vec<Column> {
    vec![
        named("date"),
        named("completed_sessions"),
        named("completed_users"),
        named("completed_bytes"),
        None,
        named("cancelled_sessions"),
        named("cancelled_users"),
        None,
        named("error_sessions"),
        named("error_users"),
    ]
}

/// Column order of the package-log CSV output: date, one request/file pair
/// per bundle, then preproc and unproc, each followed by a placeholder.
pub fn package_csv_columns(registry: &BundleRegistry) -> Vec<Column> {
    let mut columns = vec![named("date")];
    for bundle in registry.bundles() {
        columns.push(Some(bundle.name.clone()));
        columns.push(Some(bundle.files_key()));
    }
    columns.extend([None, named("preproc"), None, named("unproc"), None]);
    columns
}

/// Column order of the packages sheet.
///
/// Same positions as [`package_csv_columns`]. The first placeholder holds the
/// counted resource, if one is configured; the other two hold the
/// completed-transfer file counts.
pub fn package_sheet_columns(
    registry: &BundleRegistry,
    counted: Option<&CountedResource>,
) -> Vec<Column> {
    let mut columns = vec![named("date")];
    for bundle in registry.bundles() {
        columns.push(Some(bundle.name.clone()));
        columns.push(Some(bundle.files_key()));
    }
    columns.extend([
        counted.map(|c| c.name.clone()),
        named("preproc"),
        named("preproc_completed"),
        named("unproc"),
        named("unproc_completed"),
    ]);
    columns
}

// ── Row rendering ─────────────────────────────────────────────────────────────

/// Cell texts for `columns`, blank for placeholders and unmapped names.
pub fn row_cells(columns: &[Column], values: &ValueMap) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            column
                .as_ref()
                .and_then(|name| values.get(name))
                .map(CellValue::to_string)
                .unwrap_or_default()
        })
        .collect()
}

/// Join cells into one CSV line, without the line terminator.
pub fn csv_line(cells: &[String]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(cells)?;
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    let line = String::from_utf8(bytes)
        .map_err(|e| DlStatError::Sheet(format!("CSV row is not UTF-8: {}", e)))?;
    Ok(line.trim_end_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::Bundle;

    fn registry() -> BundleRegistry {
        BundleRegistry::new(vec![
            Bundle::new("g1", ["A"]),
            Bundle::new("g5", ["A", "B", "C", "D", "E"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_package_csv_columns_layout() {
        let cols = package_csv_columns(&registry());
        let names: Vec<&str> = cols.iter().map(|c| c.as_deref().unwrap_or("")).collect();
        assert_eq!(
            names,
            vec!["date", "g1", "g1_files", "g5", "g5_files", "", "preproc", "", "unproc", ""]
        );
    }

    #[test]
    fn test_package_sheet_columns_fill_placeholders() {
        let counted = CountedResource {
            name: "g20_avg".to_string(),
            project: "HCP_Q1".to_string(),
            resource: "Q1".to_string(),
            filename: "avg.zip".to_string(),
        };
        let cols = package_sheet_columns(&registry(), Some(&counted));
        assert_eq!(cols.len(), package_csv_columns(&registry()).len());
        assert_eq!(cols[5].as_deref(), Some("g20_avg"));
        assert_eq!(cols[6].as_deref(), Some("preproc"));
        assert_eq!(cols[7].as_deref(), Some("preproc_completed"));
        assert_eq!(cols[9].as_deref(), Some("unproc_completed"));
    }

    #[test]
    fn test_package_sheet_columns_keep_positions_without_counted_resource() {
        let cols = package_sheet_columns(&registry(), None);
        assert_eq!(cols.len(), package_csv_columns(&registry()).len());
        assert!(cols[5].is_none());
        assert_eq!(cols[6].as_deref(), Some("preproc"));
        assert_eq!(cols[8].as_deref(), Some("unproc"));
    }

    #[test]
    fn test_stats_columns_have_blank_placeholders() {
        let cols = stats_columns();
        assert_eq!(cols.len(), 10);
        assert!(cols[4].is_none());
        assert!(cols[7].is_none());
    }

    #[test]
    fn test_row_cells_blank_for_missing_values() {
        let mut values = ValueMap::new();
        values.insert(
            "date".to_string(),
            NaiveDate::from_ymd_opt(2013, 6, 1).unwrap().into(),
        );
        values.insert("g1".to_string(), 3u64.into());
        let cols = vec![named("date"), named("g1"), None, named("missing")];
        assert_eq!(row_cells(&cols, &values), vec!["2013-06-01", "3", "", ""]);
    }

    #[test]
    fn test_csv_line_quotes_when_needed() {
        let cells = vec!["a".to_string(), "b,c".to_string(), "say \"hi\"".to_string()];
        assert_eq!(csv_line(&cells).unwrap(), "a,\"b,c\",\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_line_keeps_empty_cells() {
        let cells: Vec<String> = ["2013-06-01", "", "3", ""].iter().map(|s| s.to_string()).collect();
        assert_eq!(csv_line(&cells).unwrap(), "2013-06-01,,3,");
    }
}
