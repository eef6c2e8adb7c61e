mod bootstrap;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dlstat_core::error::DlStatError;
use dlstat_core::settings::{
    Command, GeolocateArgs, PkglogArgs, SessionsArgs, Settings, SiteConfig, UpdateArgs,
};
use dlstat_core::time_utils::today_in;
use dlstat_data::aggregator::DownloadAggregator;
use dlstat_data::reader::{aggregate_files, aggregate_lines, collect_stats_for_date, ParsePolicy};
use dlstat_data::report::{csv_row, render_report};
use dlstat_data::sessions::{JsonSessionStatsSource, SessionStatsSource};
use dlstat_runtime::geolocate::{enrich, read_addresses, HttpGeoLookup, JsonGeoStore};
use dlstat_runtime::sheet::CsvWorkbook;
use dlstat_runtime::update::UpdateDriver;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    bootstrap::setup_logging(settings.effective_log_level())?;

    let config = SiteConfig::load(settings.config.as_deref())
        .context("failed to load site configuration")?;
    tracing::debug!("hcpdlstat v{} starting", env!("CARGO_PKG_VERSION"));

    match settings.command {
        Command::Pkglog(args) => run_pkglog(&config, args),
        Command::Sessions(args) => run_sessions(&config, args),
        Command::Update(args) => run_update(&config, args),
        Command::Geolocate(args) => run_geolocate(&config, args).await,
    }
}

fn policy(skip_malformed: bool) -> ParsePolicy {
    if skip_malformed {
        ParsePolicy::Skip
    } else {
        ParsePolicy::Abort
    }
}

/// A path from the command line, else from configuration, else an error
/// naming the configuration key.
fn required_path(cli: Option<PathBuf>, configured: Option<&PathBuf>, key: &str) -> Result<PathBuf> {
    cli.or_else(|| configured.cloned())
        .ok_or_else(|| DlStatError::Config(format!("{} is not set", key)).into())
}

fn run_pkglog(config: &SiteConfig, args: PkglogArgs) -> Result<()> {
    let registry = config.bundle_registry()?;
    let aggregator = DownloadAggregator::new(registry);
    let policy = policy(args.skip_malformed);

    let snapshot = match args.date {
        Some(spec) => {
            let today = today_in(config.packagelog.timezone.as_deref());
            collect_stats_for_date(
                config.logdir()?,
                &config.packagelog.logname,
                spec,
                today,
                &aggregator,
                policy,
            )?
        }
        None if args.logfiles.is_empty() => {
            aggregate_lines(io::stdin().lock(), &aggregator, policy)
                .context("failed to read log from stdin")?
        }
        None => aggregate_files(&args.logfiles, &aggregator, policy)?,
    };

    let mut out = io::stdout().lock();
    if args.csv {
        writeln!(out, "{}", csv_row(&snapshot, aggregator.registry())?)?;
    } else {
        write!(out, "{}", render_report(&snapshot, aggregator.registry()))?;
    }
    Ok(())
}

fn run_sessions(config: &SiteConfig, args: SessionsArgs) -> Result<()> {
    let file = required_path(args.file, config.sessions.file.as_ref(), "sessions.file")?;
    let source = JsonSessionStatsSource::open(&file)?;
    let stats = source.stats_for(args.date)?;

    if args.csv {
        println!("{}", stats.csv_row()?);
    } else {
        println!("{}", serde_json::to_string_pretty(&stats.to_value_map())?);
    }
    Ok(())
}

fn run_update(config: &SiteConfig, args: UpdateArgs) -> Result<()> {
    let workbook_dir = required_path(
        args.workbook,
        config.reporting.workbook_dir.as_ref(),
        "reporting.workbook_dir",
    )?;
    let sessions_file = required_path(None, config.sessions.file.as_ref(), "sessions.file")?;

    let workbook = CsvWorkbook::open(&workbook_dir)?;
    let mut stats = workbook.sheet(&config.reporting.sheet_stats)?;
    let mut packages = workbook.sheet(&config.reporting.sheet_packages)?;

    let driver = UpdateDriver::new(
        config.logdir()?,
        &config.packagelog.logname,
        DownloadAggregator::new(config.bundle_registry()?),
        config.counted_resource().cloned(),
        JsonSessionStatsSource::open(&sessions_file)?,
    )
    .with_policy(policy(args.skip_malformed));

    let today = today_in(config.packagelog.timezone.as_deref());
    let summary = driver
        .run(&mut stats, &mut packages, today)
        .with_context(|| format!("failed to update workbook {}", workbook_dir.display()))?;

    println!(
        "Added {} day(s) after {} to {}",
        summary.appended_days(),
        summary.previous_last_date,
        workbook_dir.display()
    );
    Ok(())
}

async fn run_geolocate(config: &SiteConfig, args: GeolocateArgs) -> Result<()> {
    let geo = &config.geolocate;
    let table = required_path(args.table, geo.table.as_ref(), "geolocate.table")?;
    let addresses = required_path(args.addresses, geo.addresses.as_ref(), "geolocate.addresses")?;

    let timeout = Duration::try_from_secs_f64(geo.timeout_seconds)
        .context("geolocate.timeout_seconds must be a non-negative number")?;
    let lookup = HttpGeoLookup::new(&geo.service_url, timeout)?;
    let mut store = JsonGeoStore::open(&table)?;

    let summary = enrich(&lookup, &mut store, read_addresses(&addresses)?).await?;
    store
        .save()
        .with_context(|| format!("failed to write geolocation table {}", table.display()))?;

    println!(
        "{} added, {} already known, {} skipped",
        summary.added, summary.already_known, summary.skipped
    );
    Ok(())
}
