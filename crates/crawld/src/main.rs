//! crawld — the crawlgrid daemon.
//!
//! Single binary that assembles the crawl subsystems:
//! - Browser pool (in-memory stub units in dry runs)
//! - Domain scheduler
//! - Autoscaler
//! - Dispatch loop
//!
//! # Usage
//!
//! ```text
//! crawld run --jobs jobs.json --dry-run
//! crawld config --output crawlgrid.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info};

use crawl_core::{CrawlConfig, load_jobs};
use crawl_runtime::{LaunchOptions, StubRuntime, SysinfoProbe, SystemProbe};
use crawlgrid_autoscale::{AutoScaler, ScalerConfig, ScalerEvent};
use crawlgrid_dispatch::{DispatchConfig, Dispatcher, ScriptedExecutor};
use crawlgrid_pool::{BrowserPool, PoolConfig, PoolEvent};
use crawlgrid_scheduler::DomainScheduler;

#[derive(Parser)]
#[command(name = "crawld", about = "Crawlgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a crawl from a jobs file.
    Run {
        /// Path to crawlgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Jobs file: a JSON array of {url, id?, domain?, payload?}.
        #[arg(long)]
        jobs: PathBuf,

        /// Simulate with in-memory browser units instead of real ones.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a scaffold crawlgrid.toml.
    Config {
        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawld=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            jobs,
            dry_run,
        } => run_crawl(config, jobs, dry_run).await,
        Command::Config { output } => write_scaffold(output),
    }
}

async fn run_crawl(config: Option<PathBuf>, jobs: PathBuf, dry_run: bool) -> anyhow::Result<()> {
    info!("crawlgrid daemon starting");

    let file_config = match &config {
        Some(path) => CrawlConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CrawlConfig::default(),
    };

    let batch =
        load_jobs(&jobs).with_context(|| format!("loading jobs from {}", jobs.display()))?;
    if batch.is_empty() {
        anyhow::bail!("jobs file {} contains no jobs", jobs.display());
    }
    info!(jobs = batch.len(), "jobs loaded");

    if !dry_run {
        anyhow::bail!("no browser runtime is wired into this build; run with --dry-run to simulate");
    }

    let pool_config = build_pool_config(&file_config);
    let scaler_config = build_scaler_config(&file_config);
    let dispatch_config = build_dispatch_config(&file_config);
    let launch = build_launch_options(&file_config);

    // ── Assemble subsystems ────────────────────────────────────

    let probe: Arc<dyn SystemProbe> = Arc::new(SysinfoProbe::new());
    let runtime = Arc::new(StubRuntime::new());

    let pool = BrowserPool::new(runtime, probe.clone(), launch, pool_config.clone())?;
    info!(
        min = pool_config.min_size,
        max = pool_config.max_size,
        "browser pool initialized"
    );

    let mut scheduler = DomainScheduler::new();
    scheduler.initialize(batch);
    let scheduler = Arc::new(Mutex::new(scheduler));
    info!("scheduler initialized");

    let scaler = Arc::new(AutoScaler::new(pool.clone(), probe, scaler_config)?);
    info!(
        recommended_max = scaler.recommended_pool_size(),
        "autoscaler initialized"
    );

    // Surface lifecycle events in the log.
    let pool_events = tokio::spawn(log_pool_events(pool.subscribe()));
    let scaler_events = tokio::spawn(log_scaler_events(scaler.subscribe()));

    let warmed = pool.warmup(pool_config.warmup_count).await;
    info!(warmed, "pool warmed");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = signal_tx.send(true);
        }
    });

    // ── Run ────────────────────────────────────────────────────

    let scaler_handle = {
        let scaler = scaler.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scaler.run(shutdown).await })
    };

    // Dry runs fetch through the scripted executor with latencies in
    // the shape of real traffic: fast HTTP, slow browser.
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_latency(Duration::from_millis(25), Duration::from_millis(120)),
    );
    let dispatcher = Dispatcher::new(pool.clone(), scheduler, executor, dispatch_config)
        .with_scaler(scaler.clone());

    let progress = dispatcher.run(shutdown_rx).await;

    // ── Teardown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    pool.shutdown(true).await;
    let _ = scaler_handle.await;
    pool_events.abort();
    scaler_events.abort();

    info!(
        completed = progress.completed,
        total = progress.total,
        "crawlgrid daemon stopped"
    );
    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}

fn write_scaffold(output: Option<PathBuf>) -> anyhow::Result<()> {
    let rendered = CrawlConfig::scaffold().to_toml_string()?;
    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "config scaffold written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn log_pool_events(mut events: broadcast::Receiver<PoolEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(event = ?event, "pool"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "pool events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_scaler_events(mut events: broadcast::Receiver<ScalerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(event = ?event, "scaler"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "scaler events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ── Config mapping ──────────────────────────────────────────────────

fn build_pool_config(config: &CrawlConfig) -> PoolConfig {
    let defaults = PoolConfig::default();
    let Some(section) = &config.pool else {
        return defaults;
    };
    PoolConfig {
        min_size: section.min_size.unwrap_or(defaults.min_size),
        max_size: section.max_size.unwrap_or(defaults.max_size),
        warmup_count: section.warmup_count.unwrap_or(defaults.warmup_count),
        idle_timeout: section
            .idle_timeout_secs
            .map_or(defaults.idle_timeout, Duration::from_secs),
        health_check_interval: section
            .health_check_interval_secs
            .map_or(defaults.health_check_interval, Duration::from_secs),
        max_jobs_per_resource: section
            .max_jobs_per_resource
            .unwrap_or(defaults.max_jobs_per_resource),
        memory_threshold_mb: section
            .memory_threshold_mb
            .unwrap_or(defaults.memory_threshold_mb),
    }
}

fn build_scaler_config(config: &CrawlConfig) -> ScalerConfig {
    let defaults = ScalerConfig::default();
    let Some(section) = &config.scaler else {
        return defaults;
    };
    ScalerConfig {
        scale_up_threshold: section
            .scale_up_threshold
            .unwrap_or(defaults.scale_up_threshold),
        scale_down_threshold: section
            .scale_down_threshold
            .unwrap_or(defaults.scale_down_threshold),
        cooldown: section
            .cooldown_secs
            .map_or(defaults.cooldown, Duration::from_secs),
        memory_per_resource_mb: section
            .memory_per_resource_mb
            .unwrap_or(defaults.memory_per_resource_mb),
        min_available_memory_mb: section
            .min_available_memory_mb
            .unwrap_or(defaults.min_available_memory_mb),
        check_interval: section
            .check_interval_secs
            .map_or(defaults.check_interval, Duration::from_secs),
        max_scale_up_per_cycle: section
            .max_scale_up_per_cycle
            .unwrap_or(defaults.max_scale_up_per_cycle),
        max_scale_down_per_cycle: section
            .max_scale_down_per_cycle
            .unwrap_or(defaults.max_scale_down_per_cycle),
    }
}

fn build_dispatch_config(config: &CrawlConfig) -> DispatchConfig {
    let defaults = DispatchConfig::default();
    let Some(section) = &config.dispatch else {
        return defaults;
    };
    DispatchConfig {
        poll_interval: section
            .poll_interval_ms
            .map_or(defaults.poll_interval, Duration::from_millis),
    }
}

fn build_launch_options(config: &CrawlConfig) -> LaunchOptions {
    let defaults = LaunchOptions::default();
    let Some(section) = &config.runtime else {
        return defaults;
    };
    LaunchOptions {
        headless: section.headless.unwrap_or(defaults.headless),
        executable: section.executable.as_ref().map(PathBuf::from),
        args: section.args.clone().unwrap_or(defaults.args),
    }
}
