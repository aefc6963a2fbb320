//! Domain queue — one domain's pending jobs plus its routing history.

use std::collections::{HashSet, VecDeque};

use crawl_core::{Domain, FetchMethod, FetchOutcome, Job, ResourceId};

/// Attempts required before routing statistics are trusted.
const MIN_SAMPLES: u64 = 3;

/// Below this HTTP success rate a domain routes straight to browsers.
const LOW_SUCCESS_RATE: f64 = 0.2;

/// Under this rate, a faster browser average also wins the route.
const MARGINAL_SUCCESS_RATE: f64 = 0.5;

/// Rolling fetch statistics for one domain.
///
/// Averages are incremental means over every attempt recorded, so no
/// sample history is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingStats {
    /// Plain-HTTP fetches attempted.
    pub http_attempts: u64,
    /// HTTP fetches that succeeded outright (no fallback needed).
    pub http_successes: u64,
    /// HTTP fetches that had to be replayed in a browser.
    pub browser_fallbacks: u64,
    /// Browser fetches recorded.
    pub browser_attempts: u64,
    pub avg_http_ms: f64,
    pub avg_browser_ms: f64,
}

impl RoutingStats {
    /// Fold one fetch outcome into the rolling statistics.
    pub fn record(&mut self, method: FetchMethod, outcome: &FetchOutcome) {
        let sample_ms = outcome.elapsed.as_secs_f64() * 1000.0;
        match method {
            FetchMethod::Http => {
                self.http_attempts += 1;
                push_mean(&mut self.avg_http_ms, self.http_attempts, sample_ms);
                if outcome.needs_browser {
                    self.browser_fallbacks += 1;
                } else if outcome.success {
                    self.http_successes += 1;
                }
            }
            FetchMethod::Browser => {
                self.browser_attempts += 1;
                push_mean(&mut self.avg_browser_ms, self.browser_attempts, sample_ms);
            }
        }
    }

    /// Share of HTTP attempts that succeeded outright.
    pub fn http_success_rate(&self) -> f64 {
        if self.http_attempts == 0 {
            return 0.0;
        }
        self.http_successes as f64 / self.http_attempts as f64
    }

    /// Share of HTTP attempts that ended in a browser fallback.
    pub fn fallback_ratio(&self) -> f64 {
        if self.http_attempts == 0 {
            return 0.0;
        }
        self.browser_fallbacks as f64 / self.http_attempts as f64
    }

    /// Whether new jobs for this domain should skip the HTTP attempt.
    ///
    /// True once enough attempts exist and either HTTP barely ever
    /// works, or the browser is both measured and faster while HTTP
    /// stays unreliable.
    pub fn should_skip_http(&self) -> bool {
        if self.http_attempts < MIN_SAMPLES {
            return false;
        }
        let rate = self.http_success_rate();
        if rate < LOW_SUCCESS_RATE {
            return true;
        }
        self.avg_browser_ms > 0.0
            && self.avg_browser_ms < self.avg_http_ms
            && rate < MARGINAL_SUCCESS_RATE
    }

    /// Whether this domain's fallback ratio exceeds `threshold`.
    pub fn needs_browser(&self, threshold: f64) -> bool {
        self.http_attempts >= MIN_SAMPLES && self.fallback_ratio() > threshold
    }
}

/// Incremental mean update; `n` is the count after the new sample.
fn push_mean(avg: &mut f64, n: u64, sample: f64) {
    *avg = (*avg * (n - 1) as f64 + sample) / n as f64;
}

/// One domain's backlog: pending jobs, the units working it, and its
/// routing statistics.
///
/// Queues are never dropped mid-crawl even when empty; the statistics
/// must outlive the backlog.
#[derive(Debug)]
pub struct DomainQueue {
    pub domain: Domain,
    pub(crate) jobs: VecDeque<Job>,
    pub(crate) active_slots: HashSet<ResourceId>,
    pub stats: RoutingStats,
}

impl DomainQueue {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            jobs: VecDeque::new(),
            active_slots: HashSet::new(),
            stats: RoutingStats::default(),
        }
    }

    pub fn push_back(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Requeue a job at the head so it is retried next.
    pub fn push_front(&mut self, job: Job) {
        self.jobs.push_front(job);
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Undispatched jobs waiting in this queue.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Units currently working this domain.
    pub fn active(&self) -> usize {
        self.active_slots.len()
    }
}
