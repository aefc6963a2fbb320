//! Pool events — lifecycle notifications over a broadcast channel.

use crawl_core::{Domain, ResourceId};

/// Why a unit was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    /// Served its `max_jobs_per_resource` quota.
    JobLimit,
    /// Failed too many consecutive health probes.
    Unhealthy,
    /// Sat idle past the configured timeout.
    IdleTimeout,
    /// Removed by a scale-down.
    ScaleDown,
    /// Explicit caller request.
    Manual,
}

/// Lifecycle events emitted by the pool.
///
/// Delivery is best-effort: the channel is bounded, sends never block,
/// and a slow subscriber loses the oldest events rather than ever
/// stalling the pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    ResourceCreated { id: ResourceId },
    ResourceAcquired { id: ResourceId, domain: Option<Domain> },
    ResourceReleased { id: ResourceId },
    ResourceRecycled { id: ResourceId, reason: RecycleReason },
    /// Warmup finished; the pool is open for business.
    Ready { size: u32 },
    /// An `acquire` found no idle unit and no room to create one.
    Exhausted,
    Scaled { from: u32, to: u32 },
    Shutdown,
}
