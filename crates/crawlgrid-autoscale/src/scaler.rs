//! Autoscaler — periodic pool resizing from occupancy and backlog.
//!
//! `ScalerConfig::decide` is the whole policy; `AutoScaler` wraps it
//! with the queue-depth feed, a cooldown window, the memory probe, and
//! the evaluation loop that applies decisions to the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crawl_runtime::SystemProbe;
use crawlgrid_pool::{BrowserPool, PoolStats};

/// Queued jobs one new unit is expected to absorb.
const JOBS_PER_NEW_UNIT: u32 = 5;

/// Share of idle units removed per scale-down.
const IDLE_REMOVE_FRACTION: f64 = 0.3;

/// Memory kept back for the OS when recommending a pool size.
const SYSTEM_RESERVED_MB: u64 = 4000;

const MIN_RECOMMENDED: u32 = 5;
const MAX_RECOMMENDED: u32 = 50;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("invalid scaler config: {0}")]
    InvalidConfig(String),
}

pub type ScalerResult<T> = Result<T, ScalerError>;

/// Configuration for the autoscaler.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Busy ratio above which the pool grows (given queued work).
    pub scale_up_threshold: f64,
    /// Busy ratio below which an empty-queue pool shrinks.
    pub scale_down_threshold: f64,
    /// Minimum gap between scaling actions.
    pub cooldown: Duration,
    /// Expected memory cost of one browser unit.
    pub memory_per_resource_mb: u64,
    /// Available memory the host must keep after scaling up.
    pub min_available_memory_mb: u64,
    pub check_interval: Duration,
    pub max_scale_up_per_cycle: u32,
    pub max_scale_down_per_cycle: u32,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown: Duration::from_secs(60),
            memory_per_resource_mb: 512,
            min_available_memory_mb: 1024,
            check_interval: Duration::from_secs(30),
            max_scale_up_per_cycle: 3,
            max_scale_down_per_cycle: 2,
        }
    }
}

impl ScalerConfig {
    pub fn validate(&self) -> ScalerResult<()> {
        if !(0.0..=1.0).contains(&self.scale_up_threshold) {
            return Err(ScalerError::InvalidConfig(
                "scale_up_threshold must be within 0..=1".into(),
            ));
        }
        if self.scale_down_threshold < 0.0 || self.scale_down_threshold >= self.scale_up_threshold
        {
            return Err(ScalerError::InvalidConfig(
                "scale_down_threshold must sit below scale_up_threshold".into(),
            ));
        }
        if self.memory_per_resource_mb == 0 {
            return Err(ScalerError::InvalidConfig(
                "memory_per_resource_mb must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The scaling policy. Pure: same inputs, same decision.
    ///
    /// Targets are not clamped to the pool's bounds here; `scale_to`
    /// owns the clamp.
    pub fn decide(&self, stats: &PoolStats, queue_depth: u32, available_mb: u64) -> ScaleDecision {
        let busy_ratio = if stats.total == 0 {
            0.0
        } else {
            stats.busy as f64 / stats.total as f64
        };

        if busy_ratio > self.scale_up_threshold && queue_depth > 0 {
            if available_mb < self.min_available_memory_mb {
                return ScaleDecision::MemoryConstrained;
            }
            let headroom =
                (available_mb - self.min_available_memory_mb) / self.memory_per_resource_mb;
            let add = queue_depth
                .div_ceil(JOBS_PER_NEW_UNIT)
                .min(self.max_scale_up_per_cycle)
                .min(headroom as u32);
            if add == 0 {
                return ScaleDecision::NoChange;
            }
            return ScaleDecision::ScaleUp {
                target: stats.total + add,
            };
        }

        if busy_ratio < self.scale_down_threshold && queue_depth == 0 && stats.idle > 1 {
            let remove = ((stats.idle as f64 * IDLE_REMOVE_FRACTION).floor() as u32)
                .min(self.max_scale_down_per_cycle);
            if remove == 0 {
                return ScaleDecision::NoChange;
            }
            return ScaleDecision::ScaleDown {
                target: stats.total - remove,
            };
        }

        ScaleDecision::NoChange
    }
}

/// One evaluation's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp { target: u32 },
    ScaleDown { target: u32 },
    /// Growth wanted but the host is out of memory.
    MemoryConstrained,
    NoChange,
}

/// Autoscaler notifications.
#[derive(Debug, Clone)]
pub enum ScalerEvent {
    Started,
    Stopped,
    Scaled { from: u32, to: u32, reason: String },
    MemoryConstrained { available_mb: u64 },
}

/// Periodically sizes a `BrowserPool` from occupancy, backlog, and
/// host memory.
///
/// All state is interior; share it behind an `Arc` and call `run` from
/// one task while the dispatcher feeds `set_queue_depth`.
pub struct AutoScaler {
    pool: BrowserPool,
    probe: Arc<dyn SystemProbe>,
    config: ScalerConfig,
    /// Backlog reported by the dispatcher, read at each evaluation.
    queue_depth: AtomicU32,
    /// Epoch millis of the last applied scaling action; 0 = never.
    last_scale_ms: AtomicU64,
    /// Collapses overlapping evaluations (timer vs. exhaustion nudge).
    evaluating: AtomicBool,
    events: broadcast::Sender<ScalerEvent>,
}

impl AutoScaler {
    pub fn new(
        pool: BrowserPool,
        probe: Arc<dyn SystemProbe>,
        config: ScalerConfig,
    ) -> ScalerResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            pool,
            probe,
            config,
            queue_depth: AtomicU32::new(0),
            last_scale_ms: AtomicU64::new(0),
            evaluating: AtomicBool::new(false),
            events,
        })
    }

    /// Report the scheduler's current undispatched backlog.
    pub fn set_queue_depth(&self, depth: u32) {
        self.queue_depth.store(depth, Ordering::SeqCst);
    }

    /// Evaluate once, honoring the cooldown window.
    pub async fn evaluate(&self) -> ScaleDecision {
        self.evaluate_inner(false).await
    }

    /// Evaluate immediately, ignoring cooldown. The dispatcher calls
    /// this when an acquisition comes back empty.
    pub async fn evaluate_now(&self) -> ScaleDecision {
        self.evaluate_inner(true).await
    }

    /// Periodic evaluation until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            up = self.config.scale_up_threshold,
            down = self.config.scale_down_threshold,
            "autoscaler started"
        );
        self.emit(ScalerEvent::Started);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {
                    self.evaluate().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("autoscaler stopped");
        self.emit(ScalerEvent::Stopped);
    }

    /// Pool size this host can sensibly run, from total memory and CPU
    /// count. A starting point for `max_size`, not a promise.
    pub fn recommended_pool_size(&self) -> u32 {
        let by_memory = self.probe.total_memory_mb().saturating_sub(SYSTEM_RESERVED_MB)
            / self.config.memory_per_resource_mb;
        let by_cpu = self.probe.cpu_count() as u64 * 2;
        let candidate = by_memory.min(by_cpu).min(MAX_RECOMMENDED as u64) as u32;
        candidate.max(MIN_RECOMMENDED)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScalerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    async fn evaluate_inner(&self, ignore_cooldown: bool) -> ScaleDecision {
        // Single evaluator at a time; a timer tick racing an exhaustion
        // nudge collapses to one evaluation.
        if self.evaluating.swap(true, Ordering::SeqCst) {
            return ScaleDecision::NoChange;
        }
        let decision = self.do_evaluate(ignore_cooldown).await;
        self.evaluating.store(false, Ordering::SeqCst);
        decision
    }

    async fn do_evaluate(&self, ignore_cooldown: bool) -> ScaleDecision {
        if !ignore_cooldown && self.in_cooldown() {
            return ScaleDecision::NoChange;
        }

        let stats = self.pool.stats().await;
        let depth = self.queue_depth.load(Ordering::SeqCst);
        let available = self.probe.available_memory_mb();
        let decision = self.config.decide(&stats, depth, available);
        debug!(
            total = stats.total,
            busy = stats.busy,
            idle = stats.idle,
            depth,
            available_mb = available,
            decision = ?decision,
            "evaluated"
        );

        match decision {
            ScaleDecision::ScaleUp { target } | ScaleDecision::ScaleDown { target } => {
                let from = stats.total;
                let to = self.pool.scale_to(target).await;
                if to != from {
                    self.last_scale_ms.store(epoch_ms(), Ordering::SeqCst);
                    info!(from, to, depth, busy = stats.busy, "pool rescaled");
                    let reason = if to > from {
                        format!("{}/{} busy, {} queued", stats.busy, from, depth)
                    } else {
                        format!("{} idle, queue empty", stats.idle)
                    };
                    self.emit(ScalerEvent::Scaled { from, to, reason });
                }
            }
            ScaleDecision::MemoryConstrained => {
                warn!(
                    available_mb = available,
                    min_mb = self.config.min_available_memory_mb,
                    "scale-up blocked by memory"
                );
                self.emit(ScalerEvent::MemoryConstrained {
                    available_mb: available,
                });
            }
            ScaleDecision::NoChange => {}
        }
        decision
    }

    fn in_cooldown(&self) -> bool {
        let last = self.last_scale_ms.load(Ordering::SeqCst);
        last != 0 && epoch_ms().saturating_sub(last) < self.config.cooldown.as_millis() as u64
    }

    fn emit(&self, event: ScalerEvent) {
        let _ = self.events.send(event);
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_runtime::{FixedProbe, LaunchOptions, StubRuntime};
    use crawlgrid_pool::PoolConfig;

    fn stats(total: u32, busy: u32, idle: u32) -> PoolStats {
        PoolStats {
            total,
            busy,
            idle,
            ..Default::default()
        }
    }

    fn fast_config() -> ScalerConfig {
        ScalerConfig {
            cooldown: Duration::ZERO,
            check_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn test_pool(min: u32, max: u32) -> BrowserPool {
        BrowserPool::new(
            Arc::new(StubRuntime::new()),
            Arc::new(FixedProbe::roomy()),
            LaunchOptions::default(),
            PoolConfig {
                min_size: min,
                max_size: max,
                memory_threshold_mb: 256,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn config_validation_rejects_bad_thresholds() {
        let too_high = ScalerConfig {
            scale_up_threshold: 1.5,
            ..Default::default()
        };
        assert!(too_high.validate().is_err());

        let inverted = ScalerConfig {
            scale_down_threshold: 0.9,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_memory = ScalerConfig {
            memory_per_resource_mb: 0,
            ..Default::default()
        };
        assert!(zero_memory.validate().is_err());

        assert!(ScalerConfig::default().validate().is_ok());
    }

    #[test]
    fn saturated_pool_with_backlog_scales_up() {
        let config = ScalerConfig::default();
        // 2 units, both busy, 10 queued: grow by ceil(10/5) = 2.
        assert_eq!(
            config.decide(&stats(2, 2, 0), 10, 8192),
            ScaleDecision::ScaleUp { target: 4 }
        );
    }

    #[test]
    fn no_scale_up_without_queued_work() {
        let config = ScalerConfig::default();
        assert_eq!(
            config.decide(&stats(2, 2, 0), 0, 8192),
            ScaleDecision::NoChange
        );
    }

    #[test]
    fn scale_up_is_capped_per_cycle() {
        let config = ScalerConfig::default();
        assert_eq!(
            config.decide(&stats(2, 2, 0), 100, 8192),
            ScaleDecision::ScaleUp { target: 5 }
        );
    }

    #[test]
    fn scale_up_is_capped_by_memory_headroom() {
        let config = ScalerConfig::default();
        // Room for exactly one more unit above the reserve.
        assert_eq!(
            config.decide(&stats(2, 2, 0), 100, 1536),
            ScaleDecision::ScaleUp { target: 3 }
        );
    }

    #[test]
    fn low_memory_blocks_scale_up() {
        let config = ScalerConfig::default();
        assert_eq!(
            config.decide(&stats(2, 2, 0), 10, 512),
            ScaleDecision::MemoryConstrained
        );
        // Above the floor but with no whole unit of headroom: no-op.
        assert_eq!(
            config.decide(&stats(2, 2, 0), 10, 1100),
            ScaleDecision::NoChange
        );
    }

    #[test]
    fn quiet_pool_scales_down() {
        let config = ScalerConfig::default();
        // 1 busy of 6, nothing queued: drop floor(5 * 0.3) = 1.
        assert_eq!(
            config.decide(&stats(6, 1, 5), 0, 8192),
            ScaleDecision::ScaleDown { target: 5 }
        );
    }

    #[test]
    fn scale_down_is_capped_per_cycle() {
        let config = ScalerConfig::default();
        // floor(10 * 0.3) = 3, capped at 2.
        assert_eq!(
            config.decide(&stats(10, 0, 10), 0, 8192),
            ScaleDecision::ScaleDown { target: 8 }
        );
    }

    #[test]
    fn queued_work_blocks_scale_down() {
        let config = ScalerConfig::default();
        assert_eq!(
            config.decide(&stats(6, 1, 5), 3, 8192),
            ScaleDecision::NoChange
        );
    }

    #[test]
    fn last_spare_unit_is_kept() {
        let config = ScalerConfig::default();
        // idle == 1 never shrinks, whatever the ratio.
        assert_eq!(
            config.decide(&stats(2, 0, 1), 0, 8192),
            ScaleDecision::NoChange
        );
    }

    #[test]
    fn empty_pool_is_no_change() {
        let config = ScalerConfig::default();
        assert_eq!(config.decide(&stats(0, 0, 0), 10, 8192), ScaleDecision::NoChange);
    }

    #[tokio::test]
    async fn evaluate_applies_decision_to_pool() {
        let pool = test_pool(1, 6).await;
        pool.warmup(2).await;
        let held_a = pool.acquire(None).await.unwrap().unwrap();
        let held_b = pool.acquire(None).await.unwrap().unwrap();

        let scaler = AutoScaler::new(
            pool.clone(),
            Arc::new(FixedProbe::roomy()),
            fast_config(),
        )
        .unwrap();
        let mut rx = scaler.subscribe();
        scaler.set_queue_depth(10);

        let decision = scaler.evaluate().await;
        assert_eq!(decision, ScaleDecision::ScaleUp { target: 4 });
        assert_eq!(pool.stats().await.total, 4);

        let mut scaled = false;
        while let Ok(event) = rx.try_recv() {
            if let ScalerEvent::Scaled { from, to, .. } = event {
                scaled = from == 2 && to == 4;
            }
        }
        assert!(scaled);

        pool.release(&held_a.id).await.unwrap();
        pool.release(&held_b.id).await.unwrap();
        pool.shutdown(false).await;
    }

    #[tokio::test]
    async fn cooldown_suppresses_scaling_until_bypassed() {
        let pool = test_pool(1, 6).await;
        pool.warmup(2).await;
        let mut held = Vec::new();
        held.push(pool.acquire(None).await.unwrap().unwrap());
        held.push(pool.acquire(None).await.unwrap().unwrap());

        let mut config = fast_config();
        config.cooldown = Duration::from_secs(300);
        let scaler =
            AutoScaler::new(pool.clone(), Arc::new(FixedProbe::roomy()), config).unwrap();
        scaler.set_queue_depth(10);

        assert!(matches!(
            scaler.evaluate().await,
            ScaleDecision::ScaleUp { .. }
        ));
        assert_eq!(pool.stats().await.total, 4);

        // Saturate again; the cooldown now blocks the timer path.
        held.push(pool.acquire(None).await.unwrap().unwrap());
        held.push(pool.acquire(None).await.unwrap().unwrap());
        scaler.set_queue_depth(20);
        assert_eq!(scaler.evaluate().await, ScaleDecision::NoChange);

        // The exhaustion nudge ignores it.
        assert!(matches!(
            scaler.evaluate_now().await,
            ScaleDecision::ScaleUp { .. }
        ));
        assert_eq!(pool.stats().await.total, 6);

        for acquired in &held {
            pool.release(&acquired.id).await.unwrap();
        }
        pool.shutdown(false).await;
    }

    #[tokio::test]
    async fn quiet_pool_shrinks_through_evaluate() {
        let pool = test_pool(1, 6).await;
        pool.warmup(4).await;

        let scaler = AutoScaler::new(
            pool.clone(),
            Arc::new(FixedProbe::roomy()),
            fast_config(),
        )
        .unwrap();

        let decision = scaler.evaluate().await;
        assert_eq!(decision, ScaleDecision::ScaleDown { target: 3 });
        assert_eq!(pool.stats().await.total, 3);
        pool.shutdown(false).await;
    }

    #[tokio::test]
    async fn run_loop_scales_and_stops() {
        let pool = test_pool(1, 4).await;
        pool.warmup(1).await;
        let held = pool.acquire(None).await.unwrap().unwrap();

        let scaler = Arc::new(
            AutoScaler::new(pool.clone(), Arc::new(FixedProbe::roomy()), fast_config())
                .unwrap(),
        );
        scaler.set_queue_depth(10);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = scaler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.stats().await.total > 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        pool.release(&held.id).await.unwrap();
        pool.shutdown(false).await;
    }

    #[test]
    fn recommended_size_balances_memory_and_cpu() {
        let pool_probe = Arc::new(FixedProbe::new(8192, 16384, 8));
        // decide() needs no pool, but the scaler does; give it a dummy.
        let runtime = Arc::new(StubRuntime::new());
        let pool = BrowserPool::new(
            runtime,
            pool_probe.clone(),
            LaunchOptions::default(),
            PoolConfig::default(),
        )
        .unwrap();

        let scaler = AutoScaler::new(pool.clone(), pool_probe, ScalerConfig::default()).unwrap();
        // min((16384 - 4000) / 512, 2 * 8, 50) = min(24, 16, 50)
        assert_eq!(scaler.recommended_pool_size(), 16);

        let tiny = AutoScaler::new(
            pool,
            Arc::new(FixedProbe::new(512, 4096, 2)),
            ScalerConfig::default(),
        )
        .unwrap();
        // Memory math caps at 0; the floor of 5 wins.
        assert_eq!(tiny.recommended_pool_size(), 5);
    }
}
