//! netprobe - scheduled internet speed monitoring daemon
//!
//! Runs an external speed test on an interval, absorbs failures with retry
//! backoff and a circuit breaker, and keeps the results in SQLite.

mod api;
mod config;
mod engine;
mod network;
mod output;
mod probe;
mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::{CycleOutcome, Engine, EngineHandle};
use crate::probe::SpeedtestRunner;
use crate::storage::{Database, MetricsStore};

#[derive(Parser, Debug)]
#[command(name = "netprobe")]
#[command(version)]
#[command(about = "Scheduled internet speed monitoring", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "netprobe.conf")]
    config: PathBuf,

    /// Print each result and log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Run a single probe cycle and exit
    #[arg(long)]
    once: bool,

    /// Print the most recent stored result as JSON
    #[arg(long)]
    latest: bool,

    /// Export results for a time range as CSV
    #[arg(long)]
    export: bool,

    /// Output file for export
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Time range: --last 24h, 7d, 30m
    #[arg(long)]
    last: Option<String>,

    /// Start time for range: YYYY-MM-DD HH:MM
    #[arg(long)]
    start: Option<String>,

    /// End time for range: YYYY-MM-DD HH:MM
    #[arg(long)]
    end: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::Config::load(&args.config)?;
    if args.verbose {
        config.general.verbose = true;
    }

    init_logging(&config);

    info!("netprobe v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", args.config);

    if args.latest {
        run_latest(&config)
    } else if args.export {
        run_export(&config, &args)
    } else if args.once {
        run_once(&config).await
    } else {
        run_monitoring(&config).await
    }
}

fn init_logging(config: &config::Config) {
    let default_level = if config.general.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_store(config: &config::Config) -> Result<Database> {
    let db = Database::new(&config.general.database_path)
        .with_context(|| format!("Cannot open result store {}", config.general.database_path))?;
    db.initialize()?;
    Ok(db)
}

fn probe_runner(config: &config::Config) -> SpeedtestRunner {
    SpeedtestRunner::new(Arc::new(config.probe.clone()), config.general.device_name.clone())
}

async fn run_monitoring(config: &config::Config) -> Result<()> {
    info!("Device: {}", config.general.device_name);
    info!("Database: {}", config.general.database_path);
    info!("Probe: {} (timeout {}s)", config.probe.binary, config.probe.timeout_secs);

    let db = open_store(config)?;
    let (engine, handle) = Engine::new(config.schedule.clone(), probe_runner(config), db);
    let engine = engine.with_verbose(config.general.verbose);

    let api_task = if config.api.enabled {
        let address = format!("{}:{}", config.api.bind_address, config.api.port);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Cannot bind API listener on {}", address))?;
        let reader = Database::open_read_only(&config.general.database_path)?;
        let state = api::ApiState::new(
            handle.clone(),
            reader,
            api::service::ServiceController::new(config.api.service_name.clone()),
        );
        Some(tokio::spawn(api::serve(listener, state)))
    } else {
        None
    };

    tokio::spawn(shutdown_on_signal(handle.clone()));

    info!("Starting probe loop (Press Ctrl+C to stop)");
    let result = engine.run().await;

    if let Some(task) = api_task {
        match task.await {
            Ok(Err(e)) => error!("API server failed: {}", e),
            Err(e) => error!("API task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    result
}

async fn shutdown_on_signal(handle: EngineHandle) {
    wait_for_signal().await;
    handle.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = terminate.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_once(config: &config::Config) -> Result<()> {
    let db = open_store(config)?;
    let (mut engine, _handle) = Engine::new(config.schedule.clone(), probe_runner(config), db);

    let outcome = engine.run_cycle().await;
    engine.close()?;

    match outcome {
        CycleOutcome::Success(result) => {
            output::print_result(&result);
            Ok(())
        }
        CycleOutcome::Failed(e) => Err(anyhow::Error::new(e).context("Probe cycle failed")),
        CycleOutcome::Cancelled => anyhow::bail!("Probe cycle cancelled"),
    }
}

fn run_latest(config: &config::Config) -> Result<()> {
    let db = Database::open_read_only(&config.general.database_path)?;

    match db.latest()? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("No results recorded yet"),
    }

    Ok(())
}

fn run_export(config: &config::Config, args: &Args) -> Result<()> {
    let (start, end) = parse_time_range(args.last.as_deref(), args.start.as_deref(), args.end.as_deref())?;

    let db = Database::open_read_only(&config.general.database_path)?;
    let results = db.query_range(start, end)?;
    info!("Found {} results", results.len());

    let output_path = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(format!("netprobe_export_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S")))
    });

    output::export_csv(&results, &output_path)?;
    info!("Exported to {:?}", output_path);

    Ok(())
}

/// Resolve the export window as unix seconds. Defaults to the last 24 hours.
fn parse_time_range(last: Option<&str>, start: Option<&str>, end: Option<&str>) -> Result<(i64, i64)> {
    match (last, start, end) {
        (Some(last), _, _) => {
            let end = chrono::Utc::now().timestamp();
            Ok((end - parse_duration(last)?.num_seconds(), end))
        }
        (None, Some(start), Some(end)) => {
            let start = parse_minute(start)?;
            let end = parse_minute(end)?;
            if end < start {
                anyhow::bail!("--end must not be before --start");
            }
            Ok((start, end))
        }
        (None, Some(_), None) | (None, None, Some(_)) => {
            anyhow::bail!("--start and --end must be given together")
        }
        (None, None, None) => {
            let end = chrono::Utc::now().timestamp();
            Ok((end - 24 * 3600, end))
        }
    }
}

fn parse_minute(value: &str) -> Result<i64> {
    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid time '{}', expected YYYY-MM-DD HH:MM", value))?;
    Ok(naive.and_utc().timestamp())
}

fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    let Some(unit) = s.chars().last() else {
        anyhow::bail!("Empty duration. Use: 24h, 7d, 30m");
    };
    let amount: i64 = s[..s.len() - unit.len_utf8()]
        .parse()
        .with_context(|| format!("Invalid duration '{}'. Use: 24h, 7d, 30m", s))?;
    if amount < 0 {
        anyhow::bail!("Duration '{}' must not be negative", s);
    }

    let duration = match unit {
        'm' => chrono::Duration::try_minutes(amount),
        'h' => chrono::Duration::try_hours(amount),
        'd' => chrono::Duration::try_days(amount),
        _ => anyhow::bail!("Invalid duration '{}'. Use: 24h, 7d, 30m", s),
    };

    duration.with_context(|| format!("Duration '{}' is out of range", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_duration(" 7d ").unwrap(), chrono::Duration::days(7));
        assert_eq!(parse_duration("30m").unwrap(), chrono::Duration::minutes(30));
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_negative_and_huge() {
        let err = parse_duration("-5h").unwrap_err();
        assert!(err.to_string().contains("negative"), "{}", err);

        let err = parse_duration("9999999999999999h").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        assert!(parse_time_range(Some("9999999999999999d"), None, None).is_err());

        assert_eq!(parse_duration("0m").unwrap(), chrono::Duration::zero());
    }

    #[test]
    fn test_explicit_range() {
        let (start, end) = parse_time_range(None, Some("2024-03-01 00:00"), Some("2024-03-02 12:30")).unwrap();
        assert_eq!(end - start, 36 * 3600 + 30 * 60);
        assert_eq!(start, 1_709_251_200);
    }

    #[test]
    fn test_range_defaults_to_last_day() {
        let (start, end) = parse_time_range(None, None, None).unwrap();
        assert_eq!(end - start, 24 * 3600);

        let (start, end) = parse_time_range(Some("2h"), None, None).unwrap();
        assert_eq!(end - start, 2 * 3600);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(parse_time_range(None, Some("2024-03-01 00:00"), None).is_err());
        assert!(parse_time_range(None, Some("2024-03-02 00:00"), Some("2024-03-01 00:00")).is_err());
        assert!(parse_time_range(None, Some("yesterday"), Some("2024-03-01 00:00")).is_err());
    }

    #[test]
    fn test_cli_flags() {
        let args = Args::try_parse_from(["netprobe", "-c", "/etc/netprobe.conf", "--export", "--last", "7d", "-o", "out.csv"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/netprobe.conf"));
        assert!(args.export);
        assert_eq!(args.last.as_deref(), Some("7d"));
        assert_eq!(args.output, Some(PathBuf::from("out.csv")));

        let args = Args::try_parse_from(["netprobe"]).unwrap();
        assert_eq!(args.config, PathBuf::from("netprobe.conf"));
        assert!(!args.once && !args.latest && !args.verbose);
    }
}
