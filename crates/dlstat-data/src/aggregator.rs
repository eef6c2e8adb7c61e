//! Folding download events into per-day statistics.
//!
//! Every counter is a plain sum, so folding is order-independent and two
//! partial snapshots of the same day can be combined with
//! [`StatisticsSnapshot::merge`] to give exactly the sequential result.
//! A sum that does not fit in `u64` is an [`DlStatError::Overflow`]; the
//! snapshot is left as it was before the failing event.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dlstat_core::bundles::{BundleRegistry, CountedResource};
use dlstat_core::error::{DlStatError, Result};
use dlstat_core::formatting::ValueMap;
use dlstat_core::models::{LogEvent, PackageEvent, ResourceEvent};
use dlstat_core::package_types::PackageType;
use serde::Serialize;

// ── ResourceCounter ───────────────────────────────────────────────────────────

/// `project / resource / filename` path of a resource download.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceKey {
    pub project: String,
    pub resource: String,
    pub filename: String,
}

impl ResourceKey {
    pub fn new(
        project: impl Into<String>,
        resource: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            resource: resource.into(),
            filename: filename.into(),
        }
    }
}

/// Download counts per resource path. Repeated downloads of the same file
/// add up; they are never collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCounter {
    counts: BTreeMap<ResourceKey, u64>,
}

impl ResourceCounter {
    pub fn increment(&mut self, key: ResourceKey) -> Result<()> {
        let count = self.counts.entry(key).or_insert(0);
        *count = checked_sum("resource count", *count, 1)?;
        Ok(())
    }

    /// Count at a path; 0 for a path that was never seen.
    pub fn get(&self, project: &str, resource: &str, filename: &str) -> u64 {
        self.counts
            .get(&ResourceKey::new(project, resource, filename))
            .copied()
            .unwrap_or(0)
    }

    /// All paths with their counts, ordered by project, resource, filename.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    fn absorb(&mut self, other: ResourceCounter) -> Result<()> {
        for (key, n) in other.counts {
            let count = self.counts.entry(key).or_insert(0);
            *count = checked_sum("resource count", *count, n)?;
        }
        Ok(())
    }
}

// ── StatisticsSnapshot ────────────────────────────────────────────────────────

/// Requests and files attributed to one registered bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleCount {
    pub name: String,
    pub requests: u64,
    pub files: u64,
}

/// Aggregated statistics for one log date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Date the statistics describe; set by whoever chose the log file.
    pub date: Option<NaiveDate>,
    /// Individual files: subjects × packages per package request, one per
    /// resource download.
    pub files: u64,
    pub bytes: u64,
    pub unproc: u64,
    pub preproc: u64,
    /// One entry per registered bundle, in registry order.
    pub bundles: Vec<BundleCount>,
    pub resources: ResourceCounter,
    /// Malformed lines passed over when skipping is enabled.
    pub skipped_lines: u64,
}

impl StatisticsSnapshot {
    /// All-zero snapshot with one bundle slot per registered bundle.
    pub fn empty(registry: &BundleRegistry) -> Self {
        Self {
            date: None,
            files: 0,
            bytes: 0,
            unproc: 0,
            preproc: 0,
            bundles: registry
                .bundles()
                .iter()
                .map(|b| BundleCount {
                    name: b.name.clone(),
                    requests: 0,
                    files: 0,
                })
                .collect(),
            resources: ResourceCounter::default(),
            skipped_lines: 0,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleCount> {
        self.bundles.iter().find(|b| b.name == name)
    }

    /// Counter-wise sum of two snapshots of the same day.
    ///
    /// Bundle counters are matched by name; the receiver's date wins when
    /// both are set.
    pub fn merge(mut self, other: StatisticsSnapshot) -> Result<Self> {
        self.date = self.date.or(other.date);
        self.files = checked_sum("files", self.files, other.files)?;
        self.bytes = checked_sum("bytes", self.bytes, other.bytes)?;
        self.unproc = checked_sum("unproc", self.unproc, other.unproc)?;
        self.preproc = checked_sum("preproc", self.preproc, other.preproc)?;
        self.skipped_lines =
            checked_sum("skipped_lines", self.skipped_lines, other.skipped_lines)?;
        for theirs in other.bundles {
            match self.bundles.iter_mut().find(|b| b.name == theirs.name) {
                Some(ours) => {
                    ours.requests = checked_sum("bundle requests", ours.requests, theirs.requests)?;
                    ours.files = checked_sum("bundle files", ours.files, theirs.files)?;
                }
                None => self.bundles.push(theirs),
            }
        }
        self.resources.absorb(other.resources)?;
        Ok(self)
    }

    /// Values of the configured counted resources, keyed by their names.
    pub fn counted_resources(&self, counted: &[CountedResource]) -> BTreeMap<String, u64> {
        counted
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    self.resources.get(&c.project, &c.resource, &c.filename),
                )
            })
            .collect()
    }

    /// Flat named statistics for row rendering.
    pub fn to_value_map(&self, counted: &[CountedResource]) -> ValueMap {
        let mut values = ValueMap::new();
        if let Some(date) = self.date {
            values.insert("date".to_string(), date.into());
        }
        values.insert("files".to_string(), self.files.into());
        values.insert("bytes".to_string(), self.bytes.into());
        values.insert("unproc".to_string(), self.unproc.into());
        values.insert("preproc".to_string(), self.preproc.into());
        for b in &self.bundles {
            values.insert(b.name.clone(), b.requests.into());
            values.insert(format!("{}_files", b.name), b.files.into());
        }
        for (name, n) in self.counted_resources(counted) {
            values.insert(name, n.into());
        }
        values
    }
}

// ── DownloadAggregator ────────────────────────────────────────────────────────

/// Folds [`LogEvent`]s into a [`StatisticsSnapshot`] against a fixed
/// bundle registry.
#[derive(Debug, Clone)]
pub struct DownloadAggregator {
    registry: BundleRegistry,
}

impl DownloadAggregator {
    pub fn new(registry: BundleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BundleRegistry {
        &self.registry
    }

    pub fn empty_snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot::empty(&self.registry)
    }

    /// Return `snapshot` with `event` added.
    pub fn fold(
        &self,
        mut snapshot: StatisticsSnapshot,
        event: &LogEvent,
    ) -> Result<StatisticsSnapshot> {
        self.apply(&mut snapshot, event)?;
        Ok(snapshot)
    }

    /// Add `event` to `snapshot` in place. On overflow `snapshot` is
    /// unchanged.
    pub fn apply(&self, snapshot: &mut StatisticsSnapshot, event: &LogEvent) -> Result<()> {
        let bytes = checked_sum("bytes", snapshot.bytes, event.bytes_requested())?;
        match event {
            LogEvent::Package(e) => self.apply_package(snapshot, e, bytes),
            LogEvent::Resource(e) => apply_resource(snapshot, e, bytes),
        }
    }

    /// Fold every event of `events` into a fresh snapshot.
    pub fn fold_all<'a, I>(&self, events: I) -> Result<StatisticsSnapshot>
    where
        I: IntoIterator<Item = &'a LogEvent>,
    {
        events
            .into_iter()
            .try_fold(self.empty_snapshot(), |s, e| self.fold(s, e))
    }

    fn apply_package(
        &self,
        snapshot: &mut StatisticsSnapshot,
        event: &PackageEvent,
        bytes: u64,
    ) -> Result<()> {
        let subjects = event.subjects.len() as u64;

        let files = checked_sum("files", snapshot.files, event.file_count())?;
        let mut unproc = snapshot.unproc;
        let mut preproc = snapshot.preproc;
        for package in &event.packages {
            for kind in PackageType::ALL {
                if !kind.matches(package) {
                    continue;
                }
                match kind {
                    PackageType::Unproc => unproc = checked_sum("unproc", unproc, subjects)?,
                    PackageType::Preproc => preproc = checked_sum("preproc", preproc, subjects)?,
                }
            }
        }

        let bundle = match self.registry.classify(&event.subjects) {
            Some(bundle) => match snapshot.bundles.iter().position(|b| b.name == bundle.name) {
                Some(index) => {
                    let slot = &snapshot.bundles[index];
                    let requests = checked_sum("bundle requests", slot.requests, 1)?;
                    let files = checked_sum(
                        "bundle files",
                        slot.files,
                        event.packages.len() as u64,
                    )?;
                    Some((index, requests, files))
                }
                None => None,
            },
            None => None,
        };

        snapshot.files = files;
        snapshot.bytes = bytes;
        snapshot.unproc = unproc;
        snapshot.preproc = preproc;
        if let Some((index, requests, files)) = bundle {
            snapshot.bundles[index].requests = requests;
            snapshot.bundles[index].files = files;
        }
        Ok(())
    }
}

fn apply_resource(snapshot: &mut StatisticsSnapshot, event: &ResourceEvent, bytes: u64) -> Result<()> {
    let files = checked_sum("files", snapshot.files, 1)?;
    snapshot.resources.increment(ResourceKey::new(
        event.project.clone(),
        event.resource.clone(),
        event.filename.clone(),
    ))?;
    snapshot.files = files;
    snapshot.bytes = bytes;
    Ok(())
}

fn checked_sum(field: &'static str, total: u64, n: u64) -> Result<u64> {
    total.checked_add(n).ok_or_else(|| DlStatError::Overflow {
        field,
        value: format!("{} + {}", total, n),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dlstat_core::bundles::Bundle;
    use dlstat_core::classifier::parse_event;
    use dlstat_core::formatting::CellValue;

    fn aggregator() -> DownloadAggregator {
        DownloadAggregator::new(
            BundleRegistry::new(vec![
                Bundle::new("g1", ["A"]),
                Bundle::new("g5", ["A", "B", "C", "D", "E"]),
            ])
            .unwrap(),
        )
    }

    fn package(packages: &str, subjects: &str, bytes: u64) -> LogEvent {
        parse_event(&format!(
            "2013-06-01 10:15:22,031 user downloading {} x [{}] ({} bytes)",
            packages, subjects, bytes
        ))
        .unwrap()
    }

    fn resource(project: &str, res: &str, file: &str, bytes: u64) -> LogEvent {
        parse_event(&format!(
            "2013-06-01 10:16:00,000 user downloading {} from project {}, resource {} ({} bytes)",
            file, project, res, bytes
        ))
        .unwrap()
    }

    fn sample_events() -> Vec<LogEvent> {
        vec![
            package("pkgA", "S1,S2,S3", 12345),
            package("p1_unproc,p2_preproc", "A,B,C,D,E", 10),
            package("Struct_unproc", "A", 7),
            resource("ProjX", "ResY", "filename.zip", 999),
            resource("ProjX", "ResY", "filename.zip", 1),
            resource("ProjX", "ResZ", "other.zip", 2),
        ]
    }

    // ── single events ─────────────────────────────────────────────────────────

    #[test]
    fn test_package_event_without_bundle() {
        let agg = aggregator();
        let s = agg.fold_all(&[package("pkgA", "S1,S2,S3", 12345)]).unwrap();
        assert_eq!(s.files, 3);
        assert_eq!(s.bytes, 12345);
        assert!(s.bundles.iter().all(|b| b.requests == 0 && b.files == 0));
        assert!(s.resources.is_empty());
    }

    #[test]
    fn test_resource_event() {
        let agg = aggregator();
        let s = agg
            .fold_all(&[resource("ProjX", "ResY", "filename.zip", 999)])
            .unwrap();
        assert_eq!(s.files, 1);
        assert_eq!(s.bytes, 999);
        assert_eq!(s.resources.get("ProjX", "ResY", "filename.zip"), 1);
    }

    #[test]
    fn test_bundle_match_counts_request_and_packages() {
        let agg = aggregator();
        let s = agg.fold_all(&[package("p1,p2", "A,B,C,D,E", 0)]).unwrap();
        let g5 = s.bundle("g5").unwrap();
        assert_eq!(g5.requests, 1);
        assert_eq!(g5.files, 2);
        assert_eq!(s.bundle("g1").unwrap().requests, 0);
        assert_eq!(s.files, 10);
    }

    #[test]
    fn test_bundle_requires_exact_subject_set() {
        let agg = aggregator();
        let s = agg
            .fold_all(&[package("p", "A,B", 0), package("p", "A,B,C,D,E,F", 0)])
            .unwrap();
        assert!(s.bundles.iter().all(|b| b.requests == 0));
    }

    #[test]
    fn test_unproc_preproc_weighted_by_subjects() {
        let agg = aggregator();
        let s = agg.fold_all(&[package("a_unproc,b_preproc,c", "S1,S2,S3", 0)]).unwrap();
        assert_eq!(s.unproc, 3);
        assert_eq!(s.preproc, 3);
    }

    #[test]
    fn test_type_counted_once_per_package_name() {
        let agg = aggregator();
        let s = agg
            .fold_all(&[package("unproc_unproc,Unproc_and_preproc", "S1,S2", 0)])
            .unwrap();
        // Two names contain "unproc" (case-insensitively), one contains "preproc".
        assert_eq!(s.unproc, 4);
        assert_eq!(s.preproc, 2);
    }

    #[test]
    fn test_duplicate_packages_both_count() {
        let agg = aggregator();
        let s = agg.fold_all(&[package("x_unproc,x_unproc", "A", 0)]).unwrap();
        assert_eq!(s.files, 2);
        assert_eq!(s.unproc, 2);
        let g1 = s.bundle("g1").unwrap();
        assert_eq!((g1.requests, g1.files), (1, 2));
    }

    // ── algebra ───────────────────────────────────────────────────────────────

    #[test]
    fn test_fold_is_order_independent() {
        let agg = aggregator();
        let events = sample_events();
        let forward = agg.fold_all(&events).unwrap();
        let reversed: Vec<LogEvent> = events.iter().rev().cloned().collect();
        let mut rotated = events.clone();
        rotated.rotate_left(2);
        assert_eq!(forward, agg.fold_all(&reversed).unwrap());
        assert_eq!(forward, agg.fold_all(&rotated).unwrap());
    }

    #[test]
    fn test_merge_of_split_folds_equals_single_fold() {
        let agg = aggregator();
        let events = sample_events();
        let whole = agg.fold_all(&events).unwrap();
        for k in 0..=events.len() {
            let (left, right) = events.split_at(k);
            let merged = agg
                .fold_all(left)
                .unwrap()
                .merge(agg.fold_all(right).unwrap())
                .unwrap();
            assert_eq!(merged, whole, "split at {}", k);
        }
    }

    #[test]
    fn test_resource_counter_accumulates_repeats() {
        let agg = aggregator();
        let s = agg.fold_all(&sample_events()).unwrap();
        assert_eq!(s.resources.get("ProjX", "ResY", "filename.zip"), 2);
        assert_eq!(s.resources.get("ProjX", "ResZ", "other.zip"), 1);
        assert_eq!(s.resources.get("ProjX", "ResZ", "missing.zip"), 0);
        assert_eq!(s.resources.len(), 2);
    }

    #[test]
    fn test_sample_totals() {
        let s = aggregator().fold_all(&sample_events()).unwrap();
        assert_eq!(s.files, 3 + 10 + 1 + 3);
        assert_eq!(s.bytes, 12345 + 10 + 7 + 999 + 1 + 2);
        assert_eq!(s.unproc, 5 + 1);
        assert_eq!(s.preproc, 5);
    }

    // ── overflow ────────────────────────────────────────────────────────────────

    #[test]
    fn test_byte_total_overflow_is_an_error() {
        let agg = aggregator();
        let half = u64::MAX / 2 + 1;
        let mut s = agg.fold_all(&[package("p", "S1", half)]).unwrap();
        let before = s.clone();

        let err = agg.apply(&mut s, &package("p", "S1", half)).unwrap_err();
        match err {
            DlStatError::Overflow { field, .. } => assert_eq!(field, "bytes"),
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(s, before);
    }

    #[test]
    fn test_fold_all_stops_at_overflow() {
        let agg = aggregator();
        let half = u64::MAX / 2 + 1;
        let events = vec![
            resource("P", "R", "f", half),
            resource("P", "R", "f", half),
            resource("P", "R", "f", 5),
        ];
        assert!(matches!(
            agg.fold_all(&events),
            Err(DlStatError::Overflow { field: "bytes", .. })
        ));
    }

    #[test]
    fn test_merge_overflow_is_an_error() {
        let agg = aggregator();
        let mut big = agg.empty_snapshot();
        big.files = u64::MAX;
        let one = agg.fold_all(&[resource("P", "R", "f", 0)]).unwrap();
        assert!(matches!(
            big.merge(one),
            Err(DlStatError::Overflow { field: "files", .. })
        ));
    }

    // ── projection ────────────────────────────────────────────────────────────

    #[test]
    fn test_value_map_and_counted_resources() {
        let counted = vec![
            CountedResource {
                name: "y_zip".to_string(),
                project: "ProjX".to_string(),
                resource: "ResY".to_string(),
                filename: "filename.zip".to_string(),
            },
            CountedResource {
                name: "never".to_string(),
                project: "P".to_string(),
                resource: "R".to_string(),
                filename: "f".to_string(),
            },
        ];
        let date = NaiveDate::from_ymd_opt(2013, 6, 1).unwrap();
        let s = aggregator()
            .fold_all(&sample_events())
            .unwrap()
            .with_date(date);
        let values = s.to_value_map(&counted);
        assert_eq!(values.get("date"), Some(&CellValue::Date(date)));
        assert_eq!(values.get("g5"), Some(&CellValue::Count(1)));
        assert_eq!(values.get("g5_files"), Some(&CellValue::Count(2)));
        assert_eq!(values.get("y_zip"), Some(&CellValue::Count(2)));
        assert_eq!(values.get("never"), Some(&CellValue::Count(0)));
    }

    #[test]
    fn test_empty_snapshot_has_no_date() {
        let s = aggregator().empty_snapshot();
        assert_eq!(s.date, None);
        assert_eq!(s.bundles.len(), 2);
        assert!(!s.to_value_map(&[]).contains_key("date"));
    }
}
