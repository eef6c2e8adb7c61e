//! Geolocation of transfer-client addresses.
//!
//! Addresses are resolved through a freegeoip-style HTTP service
//! (`GET <service>/<ip>` returning JSON) and kept in a table keyed by IP.
//! The table enforces fixed column widths; a record that does not fit is
//! skipped with a warning rather than failing the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlstat_core::error::{DlStatError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

// ── GeoRecord ─────────────────────────────────────────────────────────────────

/// One row of the geolocation table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoRecord {
    pub ip: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub country_name: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub region_code: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub region_name: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub city: Option<String>,
    #[serde(default, alias = "zip_code", deserialize_with = "text_or_number")]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub metro_code: Option<String>,
    #[serde(default, alias = "area_code", deserialize_with = "text_or_number")]
    pub areacode: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Services disagree on whether codes are strings or numbers; empty strings
/// mean "unknown".
fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

const IP_WIDTH: usize = 16;
const COUNTRY_CODE_WIDTH: usize = 2;
const CODE_WIDTH: usize = 64;
const TEXT_WIDTH: usize = 256;

impl GeoRecord {
    /// Check the record against the table's column constraints.
    pub fn validate(&self) -> Result<()> {
        if self.ip.is_empty() {
            return Err(DlStatError::Constraint {
                column: "ip",
                reason: "must not be empty".to_string(),
            });
        }
        check_text("ip", Some(&self.ip), IP_WIDTH)?;
        check_text("country_code", self.country_code.as_deref(), COUNTRY_CODE_WIDTH)?;
        check_text("country_name", self.country_name.as_deref(), TEXT_WIDTH)?;
        check_text("region_code", self.region_code.as_deref(), CODE_WIDTH)?;
        check_text("region_name", self.region_name.as_deref(), TEXT_WIDTH)?;
        check_text("city", self.city.as_deref(), TEXT_WIDTH)?;
        check_text("zipcode", self.zipcode.as_deref(), CODE_WIDTH)?;
        check_text("metro_code", self.metro_code.as_deref(), CODE_WIDTH)?;
        check_text("areacode", self.areacode.as_deref(), CODE_WIDTH)?;
        check_text("source", self.source.as_deref(), TEXT_WIDTH)?;
        Ok(())
    }
}

fn check_text(column: &'static str, value: Option<&str>, width: usize) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let len = value.chars().count();
    if len > width {
        return Err(DlStatError::Constraint {
            column,
            reason: format!("{} characters exceeds width {}", len, width),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(DlStatError::Constraint {
            column,
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

// ── Lookup ────────────────────────────────────────────────────────────────────

/// Resolves an address to a geolocation record.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord>;
}

/// HTTP lookup against a freegeoip-style JSON service.
#[derive(Debug, Clone)]
pub struct HttpGeoLookup {
    client: reqwest::Client,
    service_url: String,
}

impl HttpGeoLookup {
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DlStatError::Http(e.to_string()))?;
        Ok(Self {
            client,
            service_url: service_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, ip: &str) -> String {
        format!("{}/{}", self.service_url, ip)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord> {
        let url = self.url_for(ip);
        debug!("Looking up {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DlStatError::Http(format!("{}: {}", url, e)))?;
        let mut record: GeoRecord = response
            .json()
            .await
            .map_err(|e| DlStatError::Http(format!("{}: {}", url, e)))?;

        if record.ip.is_empty() {
            record.ip = ip.to_string();
        }
        record.source = Some(self.service_url.clone());
        record.created = Some(Utc::now());
        Ok(record)
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Destination table for geolocation records, keyed by IP.
pub trait GeoStore {
    fn contains(&self, ip: &str) -> bool;

    /// Insert or replace the record for its IP. Fails with
    /// [`DlStatError::Constraint`] when the record does not fit the table.
    fn upsert(&mut self, record: GeoRecord) -> Result<()>;
}

/// Geolocation table persisted as a JSON object keyed by IP.
#[derive(Debug, Clone, Default)]
pub struct JsonGeoStore {
    path: PathBuf,
    records: BTreeMap<String, GeoRecord>,
}

impl JsonGeoStore {
    /// Load the table at `path`; a missing file is an empty table.
    pub fn open(path: &Path) -> Result<Self> {
        let records = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| DlStatError::from(e).in_file(path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(DlStatError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Replace the table file with the current records. The new content is
    /// written next to it first, so a failed save keeps the old table.
    pub fn save(&self) -> Result<()> {
        let write_error = |source: std::io::Error| DlStatError::FileWrite {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(&self.records)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(write_error)?;
        staged.write_all(json.as_bytes()).map_err(write_error)?;
        staged.persist(&self.path).map_err(|e| write_error(e.error))?;
        debug!("Saved {} geolocation records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    pub fn get(&self, ip: &str) -> Option<&GeoRecord> {
        self.records.get(ip)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl GeoStore for JsonGeoStore {
    fn contains(&self, ip: &str) -> bool {
        self.records.contains_key(ip)
    }

    fn upsert(&mut self, record: GeoRecord) -> Result<()> {
        record.validate()?;
        self.records.insert(record.ip.clone(), record);
        Ok(())
    }
}

// ── Enrichment ────────────────────────────────────────────────────────────────

/// Counts from one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub added: usize,
    pub already_known: usize,
    pub skipped: usize,
}

/// Candidate client addresses, one per line.
pub fn read_addresses(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|source| DlStatError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().map(|l| l.trim().to_string()).collect())
}

/// Look up every address not yet in `store` and add it.
///
/// Blank and repeated addresses are ignored. A failed lookup or a record
/// that violates the table constraints is logged and skipped; any other
/// store error ends the pass.
pub async fn enrich<L, S, I>(lookup: &L, store: &mut S, addresses: I) -> Result<EnrichSummary>
where
    L: GeoLookup + ?Sized,
    S: GeoStore,
    I: IntoIterator<Item = String>,
{
    let mut summary = EnrichSummary::default();
    let mut seen = BTreeSet::new();

    for ip in addresses {
        let ip = ip.trim().to_string();
        if ip.is_empty() || !seen.insert(ip.clone()) {
            continue;
        }
        if store.contains(&ip) {
            summary.already_known += 1;
            continue;
        }

        let record = match lookup.lookup(&ip).await {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping {}: {}", ip, e);
                summary.skipped += 1;
                continue;
            }
        };
        match store.upsert(record) {
            Ok(()) => summary.added += 1,
            Err(e @ DlStatError::Constraint { .. }) => {
                warn!("skipping {}: {}", ip, e);
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Geolocation: {} added, {} already known, {} skipped",
        summary.added, summary.already_known, summary.skipped
    );
    Ok(summary)
}
