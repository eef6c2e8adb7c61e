//! Subject bundles and counted-resource projections.
//!
//! Both tables are configuration data: they are loaded once from the site
//! configuration and never change during a run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{DlStatError, Result};

// ── Bundle ────────────────────────────────────────────────────────────────────

/// A named, fixed group of subjects offered as a single bulk download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    /// Report label; defaults to `Group of NN`.
    #[serde(default)]
    pub label: Option<String>,
    pub subjects: BTreeSet<String>,
}

impl Bundle {
    pub fn new<I, S>(name: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            label: None,
            subjects: subjects.into_iter().map(Into::into).collect(),
        }
    }

    /// Label used in the human-readable report.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Group of {:>2}", self.subjects.len()))
    }

    /// Column name of this bundle's file counter.
    pub fn files_key(&self) -> String {
        format!("{}_files", self.name)
    }
}

// ── BundleRegistry ────────────────────────────────────────────────────────────

/// Ordered catalog of bundles. Registry order is report and CSV order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleRegistry {
    bundles: Vec<Bundle>,
}

impl BundleRegistry {
    /// Build a registry, rejecting empty or duplicate names and empty
    /// subject sets.
    pub fn new(bundles: Vec<Bundle>) -> Result<Self> {
        let mut seen = HashSet::new();
        for bundle in &bundles {
            if bundle.name.trim().is_empty() {
                return Err(DlStatError::Config("bundle name must not be empty".into()));
            }
            if bundle.subjects.is_empty() {
                return Err(DlStatError::Config(format!(
                    "bundle {} has no subjects",
                    bundle.name
                )));
            }
            if !seen.insert(bundle.name.as_str()) {
                return Err(DlStatError::Config(format!(
                    "duplicate bundle name: {}",
                    bundle.name
                )));
            }
        }
        Ok(Self { bundles })
    }

    /// The bundle whose subject set equals `subjects` exactly, if any.
    ///
    /// Subsets and supersets never match.
    pub fn classify(&self, subjects: &BTreeSet<String>) -> Option<&Bundle> {
        self.bundles.iter().find(|b| &b.subjects == subjects)
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

// ── CountedResource ───────────────────────────────────────────────────────────

/// A named statistic read from one `project / resource / filename` path of
/// the resource counter, e.g. a group-average file that is reported in its
/// own spreadsheet column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedResource {
    pub name: String,
    pub project: String,
    pub resource: String,
    pub filename: String,
}
