//! Shelfwatch main entry point
//!
//! Command-line interface for the catalog harvest and change-monitoring
//! daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use shelfwatch::changes::{ChangeDetector, ReportBuilder};
use shelfwatch::config::load_config;
use shelfwatch::model::RecordStatus;
use shelfwatch::notify::Notifier;
use shelfwatch::sched::{Jobs, Orchestrator};
use shelfwatch::store::{shared, Repository, SqliteStore};

/// Shelfwatch: harvest a web catalog and watch it for changes
#[derive(Parser, Debug)]
#[command(name = "shelfwatch")]
#[command(version)]
#[command(about = "Catalog harvester and change monitor", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler daemon until interrupted
    Run,

    /// Run one full catalog scan and exit
    Scan {
        /// Discard checkpoints and refetch everything
        #[arg(long)]
        fresh: bool,
    },

    /// Build and write a daily change report
    Report {
        /// UTC day to report on (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run the maintenance pass once
    Maintenance,

    /// Run a health check and print the result
    Health,

    /// Show store statistics and exit
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = Arc::new(load_config(&cli.config).context("failed to load configuration")?);

    let store = SqliteStore::new(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let store = shared(store);

    let notifier = Notifier::new(&config.notify);
    let detector = ChangeDetector::new(
        store.clone(),
        notifier.clone(),
        config.changes.price_change_threshold,
    );
    let reporter = ReportBuilder::new(store.clone(), config.storage.reports_dir.clone());
    let jobs = Jobs::new(
        Arc::clone(&config),
        store.clone(),
        detector,
        reporter.clone(),
        notifier,
    );

    match cli.command {
        Command::Run => {
            let orchestrator = Orchestrator::new(&config, jobs)?;
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    let _ = tx.send(true);
                }
            });
            orchestrator.run(rx).await?;
        }
        Command::Scan { fresh } => {
            if fresh {
                tracing::info!("discarding checkpoints for a fresh scan");
                store.lock().unwrap().clear_checkpoints()?;
            }
            let details = jobs.full_scan().await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Report { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = reporter.build_daily_report(date)?;
            let (json_path, csv_path) = reporter.write_report(&report)?;
            println!("Report for {date}:");
            println!("  changes: {}", report.total_changes);
            println!("  JSON: {}", json_path.display());
            println!("  CSV:  {}", csv_path.display());
        }
        Command::Maintenance => {
            let details = jobs.maintenance().await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Health => {
            let details = jobs.health_check().await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Stats => {
            print_stats(&store)?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfwatch=info,warn"),
            1 => EnvFilter::new("shelfwatch=debug,info"),
            2 => EnvFilter::new("shelfwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn print_stats(store: &shelfwatch::store::SharedStore) -> anyhow::Result<()> {
    let guard = store.lock().unwrap();
    let metrics = guard.aggregate_metrics()?;

    println!("Records:          {}", metrics.total_records);
    println!(
        "  errored:        {}",
        guard.count_by_status(RecordStatus::Error)?
    );
    println!(
        "  pending recrawl: {}",
        guard.count_by_status(RecordStatus::PendingRecrawl)?
    );
    println!("Categories:       {}", metrics.categories.len());
    if let Some(avg) = metrics.avg_response_time {
        println!("Avg response:     {avg:.3}s");
    }

    let recent = guard.recent_job_runs(Utc::now() - chrono::Duration::hours(24))?;
    println!("Job runs (24h):   {}", recent.len());
    for run in recent.iter().take(10) {
        println!(
            "  {} {} {}",
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            run.job_type,
            run.status.to_db_string()
        );
    }

    Ok(())
}
