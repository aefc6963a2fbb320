//! Pooled resource — one managed browser unit and its state machine.

use std::time::Instant;

use crawl_core::{Domain, JobId, ResourceId};
use crawl_runtime::BrowserHandle;

/// Lifecycle state of a pooled unit.
///
/// ```text
/// Warming ──▶ Idle ──▶ Busy ──▶ Draining ──▶ Idle
///               ▲        │                    │
///               │        └──▶ Idle ◀──────────┘
///               │
///            Unhealthy   (probe failure / recovery)
/// ```
///
/// `Draining` holds a unit that was released while its job's teardown
/// had not finished; it becomes acquirable again only after `mark_done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Being created; reserves capacity but is not yet usable.
    Warming,
    /// Ready for acquisition.
    Idle,
    /// Exclusively checked out to a caller.
    Busy,
    /// Released, but its last job is still unwinding.
    Draining,
    /// Failed its most recent health probe.
    Unhealthy,
}

/// One managed browser unit. Owned by the pool; callers only ever see
/// the id and a handle clone.
#[derive(Debug)]
pub struct PooledResource {
    pub id: ResourceId,
    pub status: ResourceStatus,
    /// Set once creation completes; `None` only while `Warming`.
    pub handle: Option<BrowserHandle>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Lifetime jobs served. Never reset; recycling replaces the unit.
    pub job_count: u32,
    /// Domain this unit last served; drives acquisition affinity.
    pub current_domain: Option<Domain>,
    /// Consecutive failed health probes.
    pub health_failures: u32,
    /// Job currently winding down on this unit, if any.
    pub current_job: Option<JobId>,
}

impl PooledResource {
    /// A capacity-reserving placeholder for a unit being created.
    pub(crate) fn warming(id: ResourceId) -> Self {
        let now = Instant::now();
        Self {
            id,
            status: ResourceStatus::Warming,
            handle: None,
            created_at: now,
            last_used_at: now,
            job_count: 0,
            current_domain: None,
            health_failures: 0,
            current_job: None,
        }
    }

    /// Attach the created handle and move out of `Warming`.
    pub(crate) fn activate(&mut self, handle: BrowserHandle, status: ResourceStatus) {
        self.handle = Some(handle);
        self.status = status;
        self.last_used_at = Instant::now();
    }

    /// Whether this unit can be handed out right now.
    pub fn is_acquirable(&self) -> bool {
        self.status == ResourceStatus::Idle && self.handle.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.status == ResourceStatus::Busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warming_placeholder_is_not_acquirable() {
        let resource = PooledResource::warming("browser-0".to_string());
        assert_eq!(resource.status, ResourceStatus::Warming);
        assert!(resource.handle.is_none());
        assert!(!resource.is_acquirable());
    }

    #[test]
    fn activation_makes_idle_unit_acquirable() {
        let mut resource = PooledResource::warming("browser-0".to_string());
        resource.activate(BrowserHandle::new(7), ResourceStatus::Idle);

        assert!(resource.is_acquirable());
        assert!(!resource.is_busy());
        assert_eq!(resource.handle.as_ref().map(|h| h.id()), Some(7));
    }

    #[test]
    fn busy_and_draining_units_are_not_acquirable() {
        let mut resource = PooledResource::warming("browser-0".to_string());
        resource.activate(BrowserHandle::new(1), ResourceStatus::Busy);
        assert!(!resource.is_acquirable());
        assert!(resource.is_busy());

        resource.status = ResourceStatus::Draining;
        assert!(!resource.is_acquirable());

        resource.status = ResourceStatus::Unhealthy;
        assert!(!resource.is_acquirable());
    }
}
