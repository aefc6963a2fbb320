//! End-to-end dispatch tests over the stub runtime.
//!
//! Each test wires a real pool, scheduler, and dispatcher against the
//! scripted executor and drives a whole crawl:
//! - plain batches complete over HTTP alone
//! - walled domains fall back to the browser, then route straight to it
//! - terminal failures finish the crawl instead of wedging it
//! - unit recycling and autoscaling happen mid-crawl without stalls
//! - shutdown mid-batch returns coherent partial progress

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::timeout;

use crawl_core::Job;
use crawl_runtime::{FixedProbe, LaunchOptions, StubRuntime};
use crawlgrid_autoscale::{AutoScaler, ScalerConfig};
use crawlgrid_dispatch::{DispatchConfig, Dispatcher, ScriptedExecutor};
use crawlgrid_pool::{BrowserPool, PoolConfig};
use crawlgrid_scheduler::DomainScheduler;

fn jobs(domain: &str, n: u32) -> Vec<Job> {
    (0..n)
        .map(|i| {
            Job::from_url(
                format!("{domain}-{i}"),
                &format!("https://{domain}/item/{i}"),
            )
            .unwrap()
        })
        .collect()
}

fn pool_with(min: u32, max: u32, max_jobs: u32) -> (BrowserPool, Arc<StubRuntime>) {
    let runtime = Arc::new(StubRuntime::new());
    let pool = BrowserPool::new(
        runtime.clone(),
        Arc::new(FixedProbe::roomy()),
        LaunchOptions::default(),
        PoolConfig {
            min_size: min,
            max_size: max,
            max_jobs_per_resource: max_jobs,
            memory_threshold_mb: 256,
            ..Default::default()
        },
    )
    .unwrap();
    (pool, runtime)
}

fn scheduler_with(batch: Vec<Job>) -> Arc<Mutex<DomainScheduler>> {
    let mut scheduler = DomainScheduler::new();
    scheduler.initialize(batch);
    Arc::new(Mutex::new(scheduler))
}

fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        poll_interval: Duration::from_millis(10),
    }
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn batch_completes_over_http() {
    let (pool, runtime) = pool_with(2, 4, 100);
    pool.warmup(2).await;

    let mut batch = jobs("a.example", 5);
    batch.extend(jobs("b.example", 3));
    let scheduler = scheduler_with(batch);
    let executor = Arc::new(ScriptedExecutor::new());

    let dispatcher = Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(10), dispatcher.run(shutdown_rx))
        .await
        .expect("crawl timed out");

    assert_eq!(progress.total, 8);
    assert_eq!(progress.completed, 8);
    assert_eq!(progress.remaining, 0);
    assert!((progress.http_success_rate - 1.0).abs() < 1e-9);
    assert_eq!(executor.browser_calls().await, 0);

    pool.shutdown(true).await;
    assert_eq!(runtime.live_count().await, 0);
}

#[tokio::test]
async fn empty_batch_returns_immediately() {
    let (pool, _runtime) = pool_with(1, 2, 100);
    let scheduler = scheduler_with(Vec::new());
    let executor = Arc::new(ScriptedExecutor::new());

    let dispatcher = Dispatcher::new(pool.clone(), scheduler, executor, fast_dispatch());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(2), dispatcher.run(shutdown_rx))
        .await
        .expect("empty crawl should not block");

    assert_eq!(progress.total, 0);
    assert_eq!(progress.completed, 0);
    pool.shutdown(false).await;
}

// ── Adaptive routing ────────────────────────────────────────────────

#[tokio::test]
async fn walled_domain_falls_back_then_skips_http() {
    // A single unit serializes the five jobs, so the routing stats are
    // exact: three HTTP bounces flip the domain to browser-direct.
    let (pool, runtime) = pool_with(1, 1, 100);
    pool.warmup(1).await;

    let scheduler = scheduler_with(jobs("walled.example", 5));
    let executor = Arc::new(ScriptedExecutor::new());
    executor.mark_browser_only("walled.example").await;

    let dispatcher = Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(10), dispatcher.run(shutdown_rx))
        .await
        .expect("crawl timed out");

    assert_eq!(progress.completed, 5);
    // Jobs 1-3 attempted HTTP and bounced; 4 and 5 went straight to the
    // browser.
    assert_eq!(executor.http_calls().await, 3);
    assert_eq!(executor.browser_calls().await, 5);
    assert!((progress.http_success_rate - 0.0).abs() < 1e-9);

    let scheduler = scheduler.lock().await;
    assert!(scheduler.domain_needs_browser("walled.example"));
    assert!(scheduler.should_skip_http("walled.example"));
    drop(scheduler);

    pool.shutdown(true).await;
    assert_eq!(runtime.live_count().await, 0);
}

#[tokio::test]
async fn failing_domain_completes_without_hanging() {
    let (pool, _runtime) = pool_with(1, 2, 100);
    pool.warmup(1).await;

    let mut batch = jobs("dead.example", 3);
    batch.extend(jobs("ok.example", 3));
    let scheduler = scheduler_with(batch);
    let executor = Arc::new(ScriptedExecutor::new());
    executor.mark_failing("dead.example").await;

    let dispatcher = Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(10), dispatcher.run(shutdown_rx))
        .await
        .expect("crawl timed out");

    // Terminal failures still consume their jobs.
    assert_eq!(progress.completed, 6);
    assert_eq!(progress.remaining, 0);

    let scheduler = scheduler.lock().await;
    let stats = scheduler.stats_for("dead.example").unwrap();
    assert_eq!(stats.http_successes, 0);
    assert_eq!(stats.http_attempts, 3);
    drop(scheduler);

    pool.shutdown(true).await;
}

// ── Lifecycle under load ────────────────────────────────────────────

#[tokio::test]
async fn job_limit_recycling_does_not_stall_the_crawl() {
    // Every unit retires after two jobs; replacements keep the crawl
    // moving and the cleanup task clears their scheduler affinity.
    let (pool, runtime) = pool_with(1, 1, 2);
    pool.warmup(1).await;

    let scheduler = scheduler_with(jobs("a.example", 6));
    let executor = Arc::new(ScriptedExecutor::new());

    let dispatcher = Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(10), dispatcher.run(shutdown_rx))
        .await
        .expect("crawl timed out");

    assert_eq!(progress.completed, 6);
    assert!(runtime.created_total().await >= 3);

    pool.shutdown(true).await;
    assert_eq!(runtime.live_count().await, 0);
}

#[tokio::test]
async fn backlog_drains_with_scaler_attached() {
    let (pool, runtime) = pool_with(2, 6, 100);
    pool.warmup(2).await;

    let mut batch = Vec::new();
    for domain in ["a.example", "b.example", "c.example", "d.example"] {
        batch.extend(jobs(domain, 5));
    }
    let scheduler = scheduler_with(batch);
    let executor = Arc::new(
        ScriptedExecutor::new().with_latency(Duration::from_millis(20), Duration::ZERO),
    );

    let scaler = Arc::new(
        AutoScaler::new(
            pool.clone(),
            Arc::new(FixedProbe::roomy()),
            ScalerConfig {
                cooldown: Duration::ZERO,
                check_interval: Duration::from_millis(15),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let (scaler_tx, scaler_rx) = watch::channel(false);
    let scaler_task = {
        let scaler = scaler.clone();
        tokio::spawn(async move { scaler.run(scaler_rx).await })
    };

    let dispatcher = Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    )
    .with_scaler(scaler.clone());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = timeout(Duration::from_secs(15), dispatcher.run(shutdown_rx))
        .await
        .expect("crawl timed out");

    assert_eq!(progress.completed, 20);
    assert!(pool.stats().await.total <= 6);

    scaler_tx.send(true).unwrap();
    scaler_task.await.unwrap();
    pool.shutdown(true).await;
    assert_eq!(runtime.live_count().await, 0);
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn graceful_shutdown_mid_batch() {
    let (pool, runtime) = pool_with(1, 2, 100);
    pool.warmup(1).await;

    let mut batch = Vec::new();
    for domain in ["a.example", "b.example", "c.example"] {
        batch.extend(jobs(domain, 10));
    }
    let scheduler = scheduler_with(batch);
    let executor = Arc::new(
        ScriptedExecutor::new().with_latency(Duration::from_millis(30), Duration::ZERO),
    );

    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        scheduler.clone(),
        executor.clone(),
        fast_dispatch(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let progress = timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown timed out")
        .unwrap();

    // Interrupted mid-batch: coherent partial progress, in-flight jobs
    // finished rather than dropped.
    assert!(progress.completed < 30);
    assert_eq!(progress.completed + progress.remaining, progress.total);

    pool.shutdown(true).await;
    assert_eq!(runtime.live_count().await, 0);
}
