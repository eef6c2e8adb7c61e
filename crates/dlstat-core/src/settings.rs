use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bundles::{Bundle, BundleRegistry, CountedResource};
use crate::error::{DlStatError, Result};
use crate::time_utils::DateSpec;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Download statistics for the package request log and transfer sessions
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hcpdlstat",
    about = "Download statistics for the package request log and transfer sessions",
    version
)]
pub struct Settings {
    /// Logging level
    #[arg(long, global = true, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Site configuration file (replaces ./site.toml and ~/.hcpdlstat.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract statistics from the package request log
    Pkglog(PkglogArgs),
    /// Show transfer-session statistics for one date
    Sessions(SessionsArgs),
    /// Append every missing day up to yesterday to the reporting workbook
    Update(UpdateArgs),
    /// Geolocate client addresses that are not yet in the geolocation table
    Geolocate(GeolocateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PkglogArgs {
    /// Log date (today, yesterday, or yyyy-mm-dd); read from the configured log directory
    #[arg(short, long, value_name = "DATE", value_parser = parse_date_spec)]
    pub date: Option<DateSpec>,

    /// Produce CSV-formatted output
    #[arg(short, long)]
    pub csv: bool,

    /// Skip lines that do not parse instead of aborting
    #[arg(long)]
    pub skip_malformed: bool,

    /// Log files to read when no date is given (stdin when empty)
    #[arg(value_name = "LOG-FILE-PATH")]
    pub logfiles: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SessionsArgs {
    /// Date (yyyy-mm-dd)
    #[arg(short, long, value_parser = parse_iso_date)]
    pub date: chrono::NaiveDate,

    /// Produce CSV-formatted output
    #[arg(short, long)]
    pub csv: bool,

    /// Session statistics export (overrides sessions.file)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// Workbook directory (overrides reporting.workbook_dir)
    pub workbook: Option<PathBuf>,

    /// Skip lines that do not parse instead of aborting
    #[arg(long)]
    pub skip_malformed: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GeolocateArgs {
    /// File of client addresses, one per line (overrides geolocate.addresses)
    #[arg(long)]
    pub addresses: Option<PathBuf>,

    /// Geolocation table file (overrides geolocate.table)
    #[arg(long)]
    pub table: Option<PathBuf>,
}

fn parse_date_spec(s: &str) -> std::result::Result<DateSpec, String> {
    s.parse::<DateSpec>().map_err(|e| e.to_string())
}

fn parse_iso_date(s: &str) -> std::result::Result<chrono::NaiveDate, String> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("{}: {}", s, e))
}

impl Settings {
    /// Log level after applying `--debug`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "DEBUG"
        } else {
            &self.log_level
        }
    }
}

// ── SiteConfig (TOML) ──────────────────────────────────────────────────────────

/// `[packagelog]` – where the package request logs live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageLogConfig {
    pub logdir: Option<PathBuf>,
    pub logname: String,
    /// IANA zone deciding what "today" is; system zone when unset.
    pub timezone: Option<String>,
}

impl Default for PackageLogConfig {
    fn default() -> Self {
        Self {
            logdir: None,
            logname: "package-downloads.log".to_string(),
            timezone: None,
        }
    }
}

/// `[reporting]` – the reporting workbook and its sheet names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportingConfig {
    pub workbook_dir: Option<PathBuf>,
    pub sheet_stats: String,
    pub sheet_packages: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            workbook_dir: None,
            sheet_stats: "stats".to_string(),
            sheet_packages: "packages".to_string(),
        }
    }
}

/// `[sessions]` – exported transfer-session statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionsConfig {
    pub file: Option<PathBuf>,
}

/// `[geolocate]` – lookup service and destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeolocateConfig {
    pub service_url: String,
    pub table: Option<PathBuf>,
    pub addresses: Option<PathBuf>,
    pub timeout_seconds: f64,
}

impl Default for GeolocateConfig {
    fn default() -> Self {
        Self {
            service_url: "http://freegeoip.net/json".to_string(),
            table: None,
            addresses: None,
            timeout_seconds: 10.0,
        }
    }
}

/// Site configuration merged from every configuration file that exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub packagelog: PackageLogConfig,
    pub reporting: ReportingConfig,
    pub sessions: SessionsConfig,
    pub geolocate: GeolocateConfig,
    pub bundles: Vec<Bundle>,
    pub counted_resources: Vec<CountedResource>,
}

impl SiteConfig {
    /// `./site.toml`, then `~/.hcpdlstat.toml`; later files win.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("site.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".hcpdlstat.toml"));
        }
        paths
    }

    /// Load from `explicit` when given (it must exist), otherwise from the
    /// default search paths.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(DlStatError::Config(format!(
                        "configuration file {} does not exist",
                        path.display()
                    )));
                }
                Self::load_from_paths(&[path.to_path_buf()])
            }
            None => Self::load_from_paths(&Self::search_paths()),
        }
    }

    /// Merge every file in `paths` that exists, key by key, in order.
    /// Missing files are skipped.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in paths {
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(DlStatError::FileRead {
                        path: path.clone(),
                        source,
                    })
                }
            };
            let table: toml::Table = toml::from_str(&content)?;
            tracing::debug!("loaded configuration from {}", path.display());
            merge_tables(&mut merged, table);
        }
        let config: Self = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// The packages sheet has a single column for a counted resource.
    fn validate(&self) -> Result<()> {
        if self.counted_resources.len() > 1 {
            let names: Vec<&str> = self.counted_resources.iter().map(|c| c.name.as_str()).collect();
            return Err(DlStatError::Config(format!(
                "at most one counted resource can be configured, found {}: {}",
                names.len(),
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// The counted resource shown on the packages sheet, if any.
    pub fn counted_resource(&self) -> Option<&CountedResource> {
        self.counted_resources.first()
    }

    /// Validated bundle registry in configuration order.
    pub fn bundle_registry(&self) -> Result<BundleRegistry> {
        BundleRegistry::new(self.bundles.clone())
    }

    /// The configured log directory, or a configuration error.
    pub fn logdir(&self) -> Result<&Path> {
        self.packagelog
            .logdir
            .as_deref()
            .ok_or_else(|| DlStatError::Config("packagelog.logdir is not set".to_string()))
    }
}

/// Overlay `overlay` onto `base`: nested tables merge, anything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
