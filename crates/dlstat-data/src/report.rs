//! Text renderings of a [`StatisticsSnapshot`].

use std::fmt::Write as _;

use dlstat_core::bundles::BundleRegistry;
use dlstat_core::error::Result;
use dlstat_core::formatting::{csv_line, package_csv_columns, row_cells};

use crate::aggregator::StatisticsSnapshot;

/// Multi-line human-readable report.
///
/// ```text
/// 19 files, 13644 bytes
/// 5 unprocessed, 5 preprocessed
/// Group of  1: 0 request = 0 files
/// Group of  5: 1 request = 3 files
/// Resources:
///   ProjX ResY filename.zip 1
/// ```
pub fn render_report(snapshot: &StatisticsSnapshot, registry: &BundleRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} files, {} bytes", snapshot.files, snapshot.bytes);
    let _ = writeln!(
        out,
        "{} unprocessed, {} preprocessed",
        snapshot.unproc, snapshot.preproc
    );

    for bundle in registry.bundles() {
        let (requests, files) = snapshot
            .bundle(&bundle.name)
            .map(|b| (b.requests, b.files))
            .unwrap_or((0, 0));
        let _ = writeln!(
            out,
            "{}: {} request = {} files",
            bundle.display_label(),
            requests,
            files
        );
    }

    if !snapshot.resources.is_empty() {
        out.push_str("Resources:\n");
        for (key, count) in snapshot.resources.iter() {
            let _ = writeln!(
                out,
                "  {} {} {} {}",
                key.project, key.resource, key.filename, count
            );
        }
    }

    if snapshot.skipped_lines > 0 {
        let _ = writeln!(out, "{} malformed lines skipped", snapshot.skipped_lines);
    }
    out
}

/// One CSV row: date, a request/file pair per bundle, then preproc and
/// unproc each trailed by a blank placeholder.
pub fn csv_row(snapshot: &StatisticsSnapshot, registry: &BundleRegistry) -> Result<String> {
    let values = snapshot.to_value_map(&[]);
    csv_line(&row_cells(&package_csv_columns(registry), &values))
}
