//! Domain scheduler — busiest-first dispatch with slot affinity.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crawl_core::{Domain, FetchMethod, FetchOutcome, Job, ResourceId, domain_of};

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{DomainQueue, RoutingStats};

/// Default fallback-ratio threshold for `domain_needs_browser`.
const DEFAULT_BROWSER_THRESHOLD: f64 = 0.5;

/// Crawl-wide progress snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Progress {
    pub total: u64,
    pub completed: u64,
    pub remaining: u64,
    /// Share of completed jobs that never needed a browser.
    pub http_success_rate: f64,
    /// Domains that still hold undispatched jobs.
    pub domains_remaining: usize,
}

/// Groups jobs by domain and hands them out busiest-queue-first, with
/// sticky slot-to-domain affinity so a unit keeps working the domain it
/// is warm for.
///
/// Plain state, no locking; shared users wrap it in a mutex.
#[derive(Debug)]
pub struct DomainScheduler {
    queues: HashMap<Domain, DomainQueue>,
    /// Domain each slot last worked; preferred on its next dispatch.
    affinity: HashMap<ResourceId, Domain>,
    browser_threshold: f64,
    total: u64,
    completed: u64,
    completed_http: u64,
    completed_browser: u64,
}

impl Default for DomainScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainScheduler {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            affinity: HashMap::new(),
            browser_threshold: DEFAULT_BROWSER_THRESHOLD,
            total: 0,
            completed: 0,
            completed_http: 0,
            completed_browser: 0,
        }
    }

    /// Override the fallback-ratio threshold for `domain_needs_browser`.
    pub fn with_browser_threshold(mut self, threshold: f64) -> Self {
        self.browser_threshold = threshold;
        self
    }

    /// Queue a batch of jobs, grouped by domain. Additive: a second call
    /// extends the crawl.
    pub fn initialize(&mut self, jobs: Vec<Job>) {
        let count = jobs.len() as u64;
        for job in jobs {
            self.queues
                .entry(job.domain.clone())
                .or_insert_with(|| DomainQueue::new(job.domain.clone()))
                .push_back(job);
        }
        self.total += count;
        info!(
            jobs = count,
            domains = self.queues.len(),
            total = self.total,
            "jobs queued"
        );
    }

    /// Domain with the deepest backlog, if any queue has pending work.
    /// Dispatchers use it as the pool-acquisition affinity hint.
    pub fn next_domain_hint(&self) -> Option<Domain> {
        self.busiest_domain()
    }

    /// Hand `slot` its next job: its affinity domain while that queue
    /// has work, otherwise the domain with the deepest backlog.
    pub fn next_job(&mut self, slot: &str) -> Option<Job> {
        let domain = self
            .affinity
            .get(slot)
            .filter(|d| self.queues.get(*d).is_some_and(|q| q.pending() > 0))
            .cloned()
            .or_else(|| self.busiest_domain())?;
        self.take_from(slot, &domain)
    }

    /// Pull the next job for a specific domain (a unit that just fell
    /// back to its browser wants more of the same domain).
    pub fn next_job_for_domain(&mut self, slot: &str, domain: &str) -> Option<Job> {
        self.take_from(slot, domain)
    }

    /// Put a job back, optionally at the head for immediate retry.
    ///
    /// The job keeps its original spot in the totals; requeueing is not
    /// new work.
    pub fn requeue_job(&mut self, job: Job, at_front: bool) {
        debug!(job = %job.id, domain = %job.domain, at_front, "job requeued");
        let queue = self
            .queues
            .entry(job.domain.clone())
            .or_insert_with(|| DomainQueue::new(job.domain.clone()));
        if at_front {
            queue.push_front(job);
        } else {
            queue.push_back(job);
        }
    }

    /// Record one finished job for `slot`.
    pub fn mark_completed(&mut self, slot: &str, used_browser: bool) {
        self.completed += 1;
        if used_browser {
            self.completed_browser += 1;
        } else {
            self.completed_http += 1;
        }
        if let Some(domain) = self.affinity.get(slot)
            && let Some(queue) = self.queues.get_mut(domain)
        {
            queue.active_slots.remove(slot);
        }
    }

    /// Record a finished job identified by URL rather than slot, for
    /// callers that drive fetches themselves.
    pub fn mark_completed_by_url(&mut self, url: &str, used_browser: bool) -> SchedulerResult<()> {
        domain_of(url).map_err(|e| SchedulerError::InvalidUrl(e.to_string()))?;
        self.completed += 1;
        if used_browser {
            self.completed_browser += 1;
        } else {
            self.completed_http += 1;
        }
        Ok(())
    }

    /// Fold a fetch outcome into the domain's routing statistics.
    pub fn record_result(&mut self, domain: &str, method: FetchMethod, outcome: &FetchOutcome) {
        self.queues
            .entry(domain.to_string())
            .or_insert_with(|| DomainQueue::new(domain.to_string()))
            .stats
            .record(method, outcome);
    }

    /// Whether jobs for `domain` should go straight to a browser.
    pub fn should_skip_http(&self, domain: &str) -> bool {
        self.queues
            .get(domain)
            .is_some_and(|q| q.stats.should_skip_http())
    }

    /// Whether `domain`'s fallback ratio has crossed the threshold.
    pub fn domain_needs_browser(&self, domain: &str) -> bool {
        self.queues
            .get(domain)
            .is_some_and(|q| q.stats.needs_browser(self.browser_threshold))
    }

    pub fn stats_for(&self, domain: &str) -> Option<&RoutingStats> {
        self.queues.get(domain).map(|q| &q.stats)
    }

    /// Undispatched jobs across all domains. In-flight jobs are not
    /// queued, so they do not count.
    pub fn queue_depth(&self) -> u32 {
        self.queues.values().map(|q| q.pending() as u32).sum()
    }

    /// Units currently working `domain`.
    pub fn active_on(&self, domain: &str) -> usize {
        self.queues.get(domain).map_or(0, |q| q.active())
    }

    pub fn progress(&self) -> Progress {
        let rate = if self.completed == 0 {
            0.0
        } else {
            self.completed_http as f64 / self.completed as f64
        };
        Progress {
            total: self.total,
            completed: self.completed,
            remaining: self.total.saturating_sub(self.completed),
            http_success_rate: rate,
            domains_remaining: self.queues.values().filter(|q| q.pending() > 0).count(),
        }
    }

    /// Forget a slot entirely (its unit was recycled).
    pub fn clear_slot(&mut self, slot: &str) {
        if let Some(domain) = self.affinity.remove(slot)
            && let Some(queue) = self.queues.get_mut(&domain)
        {
            queue.active_slots.remove(slot);
        }
    }

    /// Drop all queues, statistics, and counters.
    pub fn reset(&mut self) {
        self.queues.clear();
        self.affinity.clear();
        self.total = 0;
        self.completed = 0;
        self.completed_http = 0;
        self.completed_browser = 0;
        info!("scheduler reset");
    }

    fn busiest_domain(&self) -> Option<Domain> {
        self.queues
            .values()
            .filter(|q| q.pending() > 0)
            .max_by_key(|q| q.pending())
            .map(|q| q.domain.clone())
    }

    fn take_from(&mut self, slot: &str, domain: &str) -> Option<Job> {
        let queue = self.queues.get_mut(domain)?;
        let job = queue.pop()?;
        queue.active_slots.insert(slot.to_string());

        // Retarget the slot's affinity, dropping it from the old queue.
        if let Some(old) = self.affinity.insert(slot.to_string(), domain.to_string())
            && old != domain
            && let Some(old_queue) = self.queues.get_mut(&old)
        {
            old_queue.active_slots.remove(slot);
        }
        debug!(%slot, %domain, job = %job.id, "job dispatched");
        Some(job)
    }
}
