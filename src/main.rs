//! Crawl-Frontier main entry point
//!
//! This is the command-line interface for the Crawl-Frontier crawler.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use crawl_frontier::config::{load_config_with_hash, Config};
use crawl_frontier::crawler::{
    crawl, open_coordinator, reconcile_session, HttpFetcher, WorkerReport,
};
use crawl_frontier::output::{load_statistics, print_statistics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Crawl-Frontier: a crawler whose workers share one frontier
///
/// Any number of crawl-frontier processes pointed at the same database and
/// seed URL cooperate on one session. Exactly one of them should be started
/// with --seed.
#[derive(Parser, Debug)]
#[command(name = "crawl-frontier")]
#[command(version = "1.0.0")]
#[command(about = "A crawler whose workers coordinate through a shared store", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Seed URL identifying the session
    #[arg(value_name = "URL")]
    url: String,

    /// Fetch the seed page and create the session before crawling
    #[arg(long, conflicts_with_all = ["stats", "reconcile"])]
    seed: bool,

    /// Number of worker tasks in this process (overrides the config)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Show statistics for the session and exit
    #[arg(long, conflicts_with = "reconcile")]
    stats: bool,

    /// Resolve every stale claim of the session and exit
    #[arg(long)]
    reconcile: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(workers) = cli.workers {
        if !(1..=64).contains(&workers) {
            return Err(format!("--workers must be between 1 and 64, got {}", workers).into());
        }
        config.coordinator.worker_count = workers;
    }

    // Handle different modes
    if cli.stats {
        handle_stats(&config, &cli.url).await?;
    } else if cli.reconcile {
        handle_reconcile(&config, &cli.url).await?;
    } else {
        handle_crawl(config, &cli.url, cli.seed).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_frontier=info,warn"),
            1 => EnvFilter::new("crawl_frontier=debug,info"),
            2 => EnvFilter::new("crawl_frontier=trace,debug"),
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

/// Handles the --stats mode: shows statistics for the session
async fn handle_stats(config: &Config, url: &str) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let mut coordinator =
        open_coordinator(config).context("Failed to open the frontier database")?;
    let session = coordinator
        .find_session(url)
        .await?
        .with_context(|| format!("No session exists for {}", url))?;

    let stale_before = config.coordinator.stale_cutoff(Utc::now());
    let stats = load_statistics(coordinator.store(), session.id, stale_before)?;

    print_statistics(&stats);

    Ok(())
}

/// Handles the --reconcile mode: resolves stale claims left by dead workers
async fn handle_reconcile(config: &Config, url: &str) -> anyhow::Result<()> {
    let resolved = reconcile_session(config, url)
        .await
        .with_context(|| format!("Failed to reconcile the session for {}", url))?;

    println!("✓ Resolved {} stale claims", resolved);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, url: &str, seed: bool) -> anyhow::Result<()> {
    if seed {
        tracing::info!("Seeding a new session for {}", url);
    } else {
        tracing::info!("Joining the session for {}", url);
    }

    tracing::info!(
        "Workers: {}, initial budget: {}, stale claims after {}s",
        config.coordinator.worker_count,
        config.session.initial_budget,
        config.coordinator.stale_claim_after_secs
    );

    let fetcher =
        Arc::new(HttpFetcher::from_config(&config).context("Failed to build HTTP client")?);

    match crawl(&config, fetcher, url, seed).await {
        Ok(reports) => {
            let total = WorkerReport::total(&reports);
            tracing::info!("Crawl completed: {}", total);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
