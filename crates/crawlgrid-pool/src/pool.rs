//! Browser pool — creation, acquisition, recycling, and shutdown.
//!
//! One `HashMap<ResourceId, PooledResource>` behind a mutex is the single
//! source of truth; every status transition happens inside it. Runtime
//! calls (create, probe, close) always run outside the lock, with a
//! `Warming` placeholder reserving capacity during creation so that
//! concurrent acquisitions can never overshoot `max_size`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crawl_core::{Domain, ResourceId};
use crawl_runtime::{BrowserHandle, BrowserRuntime, LaunchOptions, SystemProbe};

use crate::error::{PoolError, PoolResult};
use crate::events::{PoolEvent, RecycleReason};
use crate::resource::{PooledResource, ResourceStatus};

/// Consecutive probe failures before a unit is recycled.
const HEALTH_FAILURE_LIMIT: u32 = 3;

/// Poll cadence while waiting for busy units during shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Upper bound on the shutdown wait before busy units are force-closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 128;

/// Configuration for a browser pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Floor the pool maintains; recycled units are replaced below this.
    pub min_size: u32,
    /// Hard ceiling on concurrent units.
    pub max_size: u32,
    /// Units created up front by the daemon's warmup call.
    pub warmup_count: u32,
    /// Idle units older than this are reaped (down to `min_size`).
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
    /// Jobs a unit serves before it is recycled for a fresh one.
    pub max_jobs_per_resource: u32,
    /// No new units are created while available memory is below this.
    pub memory_threshold_mb: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            warmup_count: 3,
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            max_jobs_per_resource: 20,
            memory_threshold_mb: 1024,
        }
    }
}

impl PoolConfig {
    /// Reject configs that cannot work. Bad config is a caller bug.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig("max_size must be positive".into()));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.max_jobs_per_resource == 0 {
            return Err(PoolError::InvalidConfig(
                "max_jobs_per_resource must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time pool occupancy, counted by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: u32,
    pub idle: u32,
    pub busy: u32,
    pub warming: u32,
    pub draining: u32,
    pub unhealthy: u32,
}

/// What a successful `acquire` hands back: enough to run a job, nothing
/// more. The pool keeps ownership of the unit itself.
#[derive(Debug, Clone)]
pub struct AcquiredResource {
    pub id: ResourceId,
    pub handle: BrowserHandle,
    /// Domain the unit is assigned to after this acquisition.
    pub domain: Option<Domain>,
}

struct HealthTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages a pool of browser units for a crawl.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct BrowserPool {
    runtime: Arc<dyn BrowserRuntime>,
    probe: Arc<dyn SystemProbe>,
    launch: LaunchOptions,
    config: PoolConfig,
    resources: Arc<Mutex<HashMap<ResourceId, PooledResource>>>,
    events: broadcast::Sender<PoolEvent>,
    next_id: Arc<AtomicU64>,
    shutting_down: Arc<AtomicBool>,
    health: Arc<Mutex<Option<HealthTask>>>,
}

impl BrowserPool {
    /// Create a new pool. Fails on invalid config.
    pub fn new(
        runtime: Arc<dyn BrowserRuntime>,
        probe: Arc<dyn SystemProbe>,
        launch: LaunchOptions,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            runtime,
            probe,
            launch,
            config,
            resources: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_id: Arc::new(AtomicU64::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            health: Arc::new(Mutex::new(None)),
        })
    }

    /// Pre-create up to `count` units (bounded by `max_size`) in parallel
    /// and start the periodic health task.
    ///
    /// Individual creation failures are logged and skipped; the pool
    /// opens with whatever came up.
    pub async fn warmup(&self, count: u32) -> u32 {
        let current = self.stats().await.total;
        let room = self.config.max_size.saturating_sub(current);
        let goal = count.min(room);

        let created = join_all(
            (0..goal).map(|_| self.spawn_resource(ResourceStatus::Idle, None)),
        )
        .await
        .into_iter()
        .flatten()
        .count() as u32;

        self.ensure_health_task().await;

        let size = self.stats().await.total;
        info!(requested = count, created, size, "pool warmed");
        self.emit(PoolEvent::Ready { size });
        created
    }

    /// Acquire an exclusive unit, preferring one already on
    /// `preferred_domain`.
    ///
    /// Selection order: affinity match, any idle unit (reassigning its
    /// domain and warming cookies), then on-demand creation under
    /// `max_size`. Returns `Ok(None)` when the pool is exhausted or a
    /// needed creation failed; that is backpressure, not an error.
    pub async fn acquire(
        &self,
        preferred_domain: Option<&str>,
    ) -> PoolResult<Option<AcquiredResource>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }

        let mut cookie_warm: Option<BrowserHandle> = None;
        let mut acquired: Option<AcquiredResource> = None;
        {
            let mut resources = self.resources.lock().await;
            let pick = preferred_domain
                .and_then(|d| find_idle(&resources, Some(d)))
                .or_else(|| find_idle(&resources, None));
            if let Some(id) = pick
                && let Some(resource) = resources.get_mut(&id)
                && let Some(handle) = resource.handle.clone()
            {
                resource.status = ResourceStatus::Busy;
                resource.last_used_at = Instant::now();
                if let Some(domain) = preferred_domain
                    && resource.current_domain.as_deref() != Some(domain)
                {
                    // Affinity miss: retarget the unit and warm its cookies.
                    resource.current_domain = Some(domain.to_string());
                    cookie_warm = Some(handle.clone());
                }
                acquired = Some(AcquiredResource {
                    id: id.clone(),
                    handle,
                    domain: resource.current_domain.clone(),
                });
            }
        }

        if let Some(resource) = acquired {
            if let (Some(handle), Some(domain)) = (cookie_warm, preferred_domain) {
                // Best-effort profile warm-up, outside the lock.
                if let Err(e) = self.runtime.inject_cookies(&handle, domain).await {
                    debug!(%domain, error = %e, "cookie warm-up failed");
                }
            }
            debug!(id = %resource.id, domain = ?resource.domain, "acquired idle unit");
            self.emit(PoolEvent::ResourceAcquired {
                id: resource.id.clone(),
                domain: resource.domain.clone(),
            });
            return Ok(Some(resource));
        }

        // Nothing idle; create on demand if there is room.
        if let Some((id, handle)) = self
            .spawn_resource(ResourceStatus::Busy, preferred_domain)
            .await
        {
            let domain = preferred_domain.map(|d| d.to_string());
            debug!(%id, domain = ?domain, "created unit on demand");
            self.emit(PoolEvent::ResourceAcquired {
                id: id.clone(),
                domain: domain.clone(),
            });
            return Ok(Some(AcquiredResource { id, handle, domain }));
        }

        debug!(max = self.config.max_size, "pool exhausted");
        self.emit(PoolEvent::Exhausted);
        Ok(None)
    }

    /// Return a unit to the pool after a job.
    ///
    /// Bumps the job count and recycles the unit when it has served its
    /// quota. If the job's teardown has not finished (`mark_done` not
    /// yet called), the unit parks in `Draining` instead of `Idle`.
    pub async fn release(&self, id: &str) -> PoolResult<()> {
        let mut recycle = false;
        let mut back_in_rotation = false;
        {
            let mut resources = self.resources.lock().await;
            let resource = resources
                .get_mut(id)
                .ok_or_else(|| PoolError::UnknownResource(id.to_string()))?;
            if resource.status != ResourceStatus::Busy {
                return Err(PoolError::NotAcquired(id.to_string()));
            }
            resource.job_count += 1;
            resource.last_used_at = Instant::now();
            if resource.job_count >= self.config.max_jobs_per_resource {
                recycle = true;
            } else if resource.current_job.is_some() {
                // Teardown still unwinding; park until mark_done.
                resource.status = ResourceStatus::Draining;
            } else {
                resource.status = ResourceStatus::Idle;
                back_in_rotation = true;
            }
        }

        if recycle {
            self.recycle_resource(id, RecycleReason::JobLimit).await;
        } else if back_in_rotation {
            debug!(%id, "unit returned to pool");
            self.emit(PoolEvent::ResourceReleased { id: id.to_string() });
        }
        Ok(())
    }

    /// Record that a job started executing on a unit.
    pub async fn mark_executing(&self, id: &str, job_id: &str) -> PoolResult<()> {
        let mut resources = self.resources.lock().await;
        let resource = resources
            .get_mut(id)
            .ok_or_else(|| PoolError::UnknownResource(id.to_string()))?;
        if resource.status != ResourceStatus::Busy {
            return Err(PoolError::NotAcquired(id.to_string()));
        }
        resource.current_job = Some(job_id.to_string());
        Ok(())
    }

    /// Record that a unit's job has fully unwound.
    ///
    /// Unknown ids are tolerated: a job may legitimately finish after
    /// its unit was recycled out from under it.
    pub async fn mark_done(&self, id: &str) {
        let mut released = false;
        {
            let mut resources = self.resources.lock().await;
            let Some(resource) = resources.get_mut(id) else {
                return;
            };
            resource.current_job = None;
            if resource.status == ResourceStatus::Draining {
                resource.status = ResourceStatus::Idle;
                released = true;
            }
        }
        if released {
            debug!(%id, "drained unit back in rotation");
            self.emit(PoolEvent::ResourceReleased { id: id.to_string() });
        }
    }

    /// Tear down a specific unit and replace it if that drops the pool
    /// below `min_size`. Busy units cannot be recycled.
    pub async fn recycle(&self, id: &str) -> PoolResult<()> {
        {
            let resources = self.resources.lock().await;
            let resource = resources
                .get(id)
                .ok_or_else(|| PoolError::UnknownResource(id.to_string()))?;
            if resource.is_busy() {
                return Err(PoolError::ResourceBusy(id.to_string()));
            }
        }
        self.recycle_resource(id, RecycleReason::Manual).await;
        Ok(())
    }

    /// Resize toward `target`, clamped to `[min_size, max_size]`.
    ///
    /// Growth creates units in parallel (failures logged and skipped).
    /// Shrinking retires idle units only and stops early when none are
    /// left; busy units always finish their jobs. Returns the resulting
    /// total.
    pub async fn scale_to(&self, target: u32) -> u32 {
        let clamped = target.clamp(self.config.min_size, self.config.max_size);
        let current = self.stats().await.total;

        if clamped > current {
            let want = clamped - current;
            let created = join_all(
                (0..want).map(|_| self.spawn_resource(ResourceStatus::Idle, None)),
            )
            .await
            .into_iter()
            .flatten()
            .count();
            debug!(requested = want, created, "pool grew");
        } else if clamped < current {
            let victims: Vec<ResourceId> = {
                let resources = self.resources.lock().await;
                resources
                    .values()
                    .filter(|r| r.is_acquirable())
                    .take((current - clamped) as usize)
                    .map(|r| r.id.clone())
                    .collect()
            };
            for id in &victims {
                self.recycle_resource(id, RecycleReason::ScaleDown).await;
            }
        }

        let now = self.stats().await.total;
        if now != current {
            info!(from = current, to = now, "pool scaled");
            self.emit(PoolEvent::Scaled {
                from: current,
                to: now,
            });
        }
        now
    }

    /// One health sweep: probe every non-busy unit, recycle those past
    /// the failure limit, then reap long-idle units down to `min_size`.
    ///
    /// The background health task calls this on its interval; tests call
    /// it directly.
    pub async fn run_health_pass(&self) {
        // Snapshot targets; probing happens outside the lock.
        let targets: Vec<(ResourceId, BrowserHandle)> = {
            let resources = self.resources.lock().await;
            resources
                .values()
                .filter(|r| !matches!(r.status, ResourceStatus::Busy | ResourceStatus::Warming))
                .filter_map(|r| r.handle.clone().map(|h| (r.id.clone(), h)))
                .collect()
        };

        let mut failed: Vec<ResourceId> = Vec::new();
        for (id, handle) in targets {
            let alive = self.runtime.probe(&handle).await;
            let mut resources = self.resources.lock().await;
            let Some(resource) = resources.get_mut(&id) else {
                continue; // recycled while we probed
            };
            if alive {
                if resource.health_failures > 0 {
                    debug!(%id, "probe recovered");
                }
                resource.health_failures = 0;
                if resource.status == ResourceStatus::Unhealthy {
                    resource.status = ResourceStatus::Idle;
                }
            } else {
                resource.health_failures += 1;
                warn!(%id, failures = resource.health_failures, "health probe failed");
                if resource.health_failures >= HEALTH_FAILURE_LIMIT {
                    failed.push(id.clone());
                } else if resource.status == ResourceStatus::Idle {
                    resource.status = ResourceStatus::Unhealthy;
                }
            }
        }
        for id in &failed {
            self.recycle_resource(id, RecycleReason::Unhealthy).await;
        }

        // Reap long-idle units, never dropping below the floor.
        let timed_out: Vec<ResourceId> = {
            let resources = self.resources.lock().await;
            let mut budget = (resources.len() as u32).saturating_sub(self.config.min_size);
            let mut victims = Vec::new();
            for resource in resources.values() {
                if budget == 0 {
                    break;
                }
                if resource.status == ResourceStatus::Idle
                    && resource.last_used_at.elapsed() > self.config.idle_timeout
                {
                    victims.push(resource.id.clone());
                    budget -= 1;
                }
            }
            victims
        };
        for id in &timed_out {
            self.recycle_resource(id, RecycleReason::IdleTimeout).await;
        }
    }

    /// Shut the pool down: reject further acquisitions, stop the health
    /// task, optionally wait (bounded) for busy units to finish, then
    /// close everything.
    pub async fn shutdown(&self, wait_for_jobs: bool) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(wait_for_jobs, "pool shutting down");

        // Stop the health task first so it cannot recycle mid-shutdown.
        {
            let mut slot = self.health.lock().await;
            if let Some(task) = slot.take() {
                let _ = task.shutdown_tx.send(true);
                task.handle.abort();
            }
        }

        if wait_for_jobs {
            let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
            loop {
                let busy = self.stats().await.busy;
                if busy == 0 {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(busy, "shutdown wait timed out, closing busy units anyway");
                    break;
                }
                tokio::time::sleep(SHUTDOWN_POLL).await;
            }
        }

        let leftovers: Vec<PooledResource> = {
            let mut resources = self.resources.lock().await;
            resources.drain().map(|(_, r)| r).collect()
        };
        for resource in leftovers {
            if let Some(handle) = resource.handle
                && let Err(e) = self.runtime.close(&handle).await
            {
                debug!(id = %resource.id, error = %e, "close failed during shutdown");
            }
        }

        self.emit(PoolEvent::Shutdown);
        info!("pool shut down");
    }

    /// Current occupancy counted by status.
    pub async fn stats(&self) -> PoolStats {
        let resources = self.resources.lock().await;
        let mut stats = PoolStats::default();
        for resource in resources.values() {
            stats.total += 1;
            match resource.status {
                ResourceStatus::Warming => stats.warming += 1,
                ResourceStatus::Idle => stats.idle += 1,
                ResourceStatus::Busy => stats.busy += 1,
                ResourceStatus::Draining => stats.draining += 1,
                ResourceStatus::Unhealthy => stats.unhealthy += 1,
            }
        }
        stats
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Create one unit, entering it into the map as `status`.
    ///
    /// A `Warming` placeholder holds the capacity slot while the runtime
    /// call is in flight. Returns `None` (after logging) when at
    /// capacity, memory-constrained, or the creation failed.
    async fn spawn_resource(
        &self,
        status: ResourceStatus,
        domain: Option<&str>,
    ) -> Option<(ResourceId, BrowserHandle)> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return None;
        }

        let id = {
            let mut resources = self.resources.lock().await;
            if resources.len() as u32 >= self.config.max_size {
                return None;
            }
            let available = self.probe.available_memory_mb();
            if available < self.config.memory_threshold_mb {
                warn!(
                    available_mb = available,
                    threshold_mb = self.config.memory_threshold_mb,
                    "not enough memory for a new unit"
                );
                return None;
            }
            let id = format!("browser-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            resources.insert(id.clone(), PooledResource::warming(id.clone()));
            id
        };

        match self.runtime.create(&self.launch).await {
            Ok(handle) => {
                {
                    let mut resources = self.resources.lock().await;
                    let Some(resource) = resources.get_mut(&id) else {
                        // The pool shut down while we were creating.
                        drop(resources);
                        let _ = self.runtime.close(&handle).await;
                        return None;
                    };
                    resource.activate(handle.clone(), status);
                    if let Some(domain) = domain {
                        resource.current_domain = Some(domain.to_string());
                    }
                }
                debug!(%id, "unit created");
                self.emit(PoolEvent::ResourceCreated { id: id.clone() });
                Some((id, handle))
            }
            Err(e) => {
                warn!(%id, error = %e, "unit creation failed");
                self.resources.lock().await.remove(&id);
                None
            }
        }
    }

    /// Remove a unit, close its handle (errors swallowed), and replace
    /// it if the pool fell below `min_size`.
    async fn recycle_resource(&self, id: &str, reason: RecycleReason) {
        let removed = { self.resources.lock().await.remove(id) };
        let Some(resource) = removed else {
            return;
        };

        if let Some(handle) = resource.handle
            && let Err(e) = self.runtime.close(&handle).await
        {
            // The unit is gone either way; close failures are not actionable.
            debug!(%id, error = %e, "close failed during recycle");
        }

        info!(%id, reason = ?reason, jobs = resource.job_count, "unit recycled");
        self.emit(PoolEvent::ResourceRecycled {
            id: id.to_string(),
            reason,
        });

        if !self.shutting_down.load(Ordering::SeqCst) {
            let total = self.resources.lock().await.len() as u32;
            if total < self.config.min_size {
                let _ = self.spawn_resource(ResourceStatus::Idle, None).await;
            }
        }
    }

    async fn ensure_health_task(&self) {
        let mut slot = self.health.lock().await;
        if slot.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            run_health_loop(pool, shutdown_rx).await;
        });
        *slot = Some(HealthTask {
            handle,
            shutdown_tx,
        });
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }
}

fn find_idle(
    resources: &HashMap<ResourceId, PooledResource>,
    domain: Option<&str>,
) -> Option<ResourceId> {
    resources
        .values()
        .find(|r| {
            r.is_acquirable()
                && match domain {
                    Some(d) => r.current_domain.as_deref() == Some(d),
                    None => true,
                }
        })
        .map(|r| r.id.clone())
}

/// The periodic health loop, cancelled through the pool's shutdown.
async fn run_health_loop(pool: BrowserPool, mut shutdown: watch::Receiver<bool>) {
    let interval = pool.config.health_check_interval;
    debug!(interval_ms = interval.as_millis() as u64, "health loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                pool.run_health_pass().await;
            }
            _ = shutdown.changed() => {
                debug!("health loop shutting down");
                break;
            }
        }
    }
}
