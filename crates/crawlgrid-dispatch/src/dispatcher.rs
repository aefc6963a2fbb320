//! Dispatcher — drains the scheduler through the pool until done.
//!
//! One loop owns dispatch: pick the busiest domain, acquire a unit warm
//! for it, pop a job, and hand the pair to a worker task. Workers fetch
//! over HTTP first and replay in their browser unit on fallback, then
//! feed outcomes back into the scheduler's routing statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crawl_core::{FetchMethod, Job};
use crawlgrid_autoscale::AutoScaler;
use crawlgrid_pool::{AcquiredResource, BrowserPool, PoolEvent};
use crawlgrid_scheduler::{DomainScheduler, Progress};

use crate::executor::JobExecutor;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Back-off when the pool is exhausted or all work is in flight.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Runs a crawl to completion against a pool, scheduler, and executor.
pub struct Dispatcher {
    pool: BrowserPool,
    scheduler: Arc<Mutex<DomainScheduler>>,
    executor: Arc<dyn JobExecutor>,
    scaler: Option<Arc<AutoScaler>>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        pool: BrowserPool,
        scheduler: Arc<Mutex<DomainScheduler>>,
        executor: Arc<dyn JobExecutor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            scheduler,
            executor,
            scaler: None,
            config,
        }
    }

    /// Attach an autoscaler to feed with queue depth and nudge on
    /// pool exhaustion.
    pub fn with_scaler(mut self, scaler: Arc<AutoScaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Drive the crawl until every job is done or `shutdown` flips.
    /// Returns the final progress either way.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Progress {
        info!("dispatch loop starting");
        let in_flight = Arc::new(AtomicU32::new(0));
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        // Recycled units must not keep scheduler affinity.
        let cleanup = {
            let scheduler = self.scheduler.clone();
            let mut events = self.pool.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(PoolEvent::ResourceRecycled { id, .. }) => {
                            scheduler.lock().await.clear_slot(&id);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "pool event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        loop {
            if *shutdown.borrow() {
                info!("dispatch loop interrupted");
                break;
            }

            let (depth, remaining, hint) = {
                let scheduler = self.scheduler.lock().await;
                let progress = scheduler.progress();
                (
                    scheduler.queue_depth(),
                    progress.remaining,
                    scheduler.next_domain_hint(),
                )
            };
            if let Some(scaler) = &self.scaler {
                scaler.set_queue_depth(depth);
            }

            if remaining == 0 && in_flight.load(Ordering::SeqCst) == 0 {
                info!("crawl complete");
                break;
            }

            if depth == 0 {
                // Everything left is already in flight.
                tokio::time::sleep(self.config.poll_interval).await;
                workers.retain(|w| !w.is_finished());
                continue;
            }

            let acquired = match self.pool.acquire(hint.as_deref()).await {
                Ok(Some(acquired)) => acquired,
                Ok(None) => {
                    // Exhausted: let the scaler skip its cooldown, then
                    // back off while units free up.
                    if let Some(scaler) = &self.scaler {
                        scaler.evaluate_now().await;
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                    workers.retain(|w| !w.is_finished());
                    continue;
                }
                Err(e) => {
                    info!(error = %e, "dispatch loop stopping");
                    break;
                }
            };

            let job = {
                let mut scheduler = self.scheduler.lock().await;
                hint.as_deref()
                    .and_then(|d| scheduler.next_job_for_domain(&acquired.id, d))
                    .or_else(|| scheduler.next_job(&acquired.id))
            };
            let Some(job) = job else {
                // Raced to an empty queue; hand the unit straight back.
                if let Err(e) = self.pool.release(&acquired.id).await {
                    debug!(id = %acquired.id, error = %e, "release after empty race failed");
                }
                continue;
            };

            in_flight.fetch_add(1, Ordering::SeqCst);
            workers.push(tokio::spawn(run_job(
                self.pool.clone(),
                self.scheduler.clone(),
                self.executor.clone(),
                acquired,
                job,
                in_flight.clone(),
            )));
            workers.retain(|w| !w.is_finished());
        }

        let _ = join_all(workers).await;
        cleanup.abort();

        let progress = self.scheduler.lock().await.progress();
        info!(
            completed = progress.completed,
            total = progress.total,
            "dispatch loop finished"
        );
        progress
    }
}

/// One job on one unit: HTTP attempt, browser replay on fallback, then
/// the release/teardown handshake.
async fn run_job(
    pool: BrowserPool,
    scheduler: Arc<Mutex<DomainScheduler>>,
    executor: Arc<dyn JobExecutor>,
    acquired: AcquiredResource,
    mut job: Job,
    in_flight: Arc<AtomicU32>,
) {
    let slot = acquired.id.clone();

    if let Err(e) = pool.mark_executing(&slot, &job.id).await {
        // The unit vanished between acquire and start; put the job back.
        warn!(%slot, job = %job.id, error = %e, "unit lost before start");
        scheduler.lock().await.requeue_job(job, true);
        in_flight.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    let domain = job.domain.clone();
    let skip_http = { scheduler.lock().await.should_skip_http(&domain) };

    let used_browser;
    let success;

    if skip_http {
        debug!(%domain, job = %job.id, "routing straight to browser");
        let outcome = executor.fetch_browser(&job, &acquired.handle).await;
        success = outcome.success;
        used_browser = true;
        scheduler
            .lock()
            .await
            .record_result(&domain, FetchMethod::Browser, &outcome);
    } else {
        let outcome = executor.fetch_http(&job).await;
        scheduler
            .lock()
            .await
            .record_result(&domain, FetchMethod::Http, &outcome);

        if outcome.needs_browser {
            debug!(job = %job.id, reason = ?outcome.reason, "replaying in browser");
            // Requeue at the head and take it right back under one lock,
            // so no competing worker can run the job twice.
            let replay = {
                let mut scheduler = scheduler.lock().await;
                scheduler.requeue_job(job.clone(), true);
                scheduler.next_job_for_domain(&slot, &domain)
            };
            job = replay.unwrap_or(job);

            let outcome = executor.fetch_browser(&job, &acquired.handle).await;
            success = outcome.success;
            used_browser = true;
            scheduler
                .lock()
                .await
                .record_result(&domain, FetchMethod::Browser, &outcome);
        } else {
            success = outcome.success;
            used_browser = false;
            if !success {
                warn!(job = %job.id, reason = ?outcome.reason, "job failed terminally");
            }
        }
    }

    scheduler.lock().await.mark_completed(&slot, used_browser);

    // Release first so the unit drains until teardown finishes.
    if let Err(e) = pool.release(&slot).await {
        debug!(%slot, error = %e, "release failed; unit already gone");
    }
    pool.mark_done(&slot).await;

    in_flight.fetch_sub(1, Ordering::SeqCst);
    debug!(job = %job.id, %domain, success, used_browser, "job finished");
}
