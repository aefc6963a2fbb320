//! Job executor — the fetch-and-extract seam.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crawl_core::{Domain, FallbackReason, FetchOutcome, Job};
use crawl_runtime::BrowserHandle;

/// Performs the actual fetch and extraction for jobs.
///
/// The dispatcher owns transport choice and fallback; implementations
/// just fetch. Failure modes travel inside the `FetchOutcome`, so these
/// calls are infallible at the type level.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Attempt the job over plain HTTP.
    async fn fetch_http(&self, job: &Job) -> FetchOutcome;

    /// Run the job in the given pooled browser unit.
    async fn fetch_browser(&self, job: &Job, handle: &BrowserHandle) -> FetchOutcome;
}

#[derive(Debug, Default)]
struct ExecutorState {
    /// Domains whose HTTP attempts always demand a browser replay.
    browser_only: HashSet<Domain>,
    /// Domains that fail terminally on every transport.
    failing: HashSet<Domain>,
    http_calls: u64,
    browser_calls: u64,
}

/// Deterministic executor for tests and dry runs.
///
/// Fetches succeed with a fixed item count unless the job's domain is
/// scripted otherwise. Latencies are simulated with real sleeps and
/// reported verbatim in the outcome, so routing averages in tests are
/// exact.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    state: Mutex<ExecutorState>,
    http_latency: Duration,
    browser_latency: Duration,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate per-fetch latency on each transport.
    pub fn with_latency(mut self, http: Duration, browser: Duration) -> Self {
        self.http_latency = http;
        self.browser_latency = browser;
        self
    }

    /// Script a domain to bounce every HTTP attempt to a browser.
    pub async fn mark_browser_only(&self, domain: &str) {
        self.state.lock().await.browser_only.insert(domain.to_string());
    }

    /// Script a domain to fail terminally on both transports.
    pub async fn mark_failing(&self, domain: &str) {
        self.state.lock().await.failing.insert(domain.to_string());
    }

    pub async fn http_calls(&self) -> u64 {
        self.state.lock().await.http_calls
    }

    pub async fn browser_calls(&self) -> u64 {
        self.state.lock().await.browser_calls
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn fetch_http(&self, job: &Job) -> FetchOutcome {
        if self.http_latency > Duration::ZERO {
            tokio::time::sleep(self.http_latency).await;
        }
        let mut state = self.state.lock().await;
        state.http_calls += 1;
        if state.failing.contains(&job.domain) {
            FetchOutcome::failed(FallbackReason::RequestError, self.http_latency)
        } else if state.browser_only.contains(&job.domain) {
            FetchOutcome::needs_browser(FallbackReason::BotDetection, self.http_latency)
        } else {
            FetchOutcome::success(10, self.http_latency)
        }
    }

    async fn fetch_browser(&self, job: &Job, _handle: &BrowserHandle) -> FetchOutcome {
        if self.browser_latency > Duration::ZERO {
            tokio::time::sleep(self.browser_latency).await;
        }
        let mut state = self.state.lock().await;
        state.browser_calls += 1;
        if state.failing.contains(&job.domain) {
            FetchOutcome::failed(FallbackReason::Timeout, self.browser_latency)
        } else {
            FetchOutcome::success(10, self.browser_latency)
        }
    }
}
