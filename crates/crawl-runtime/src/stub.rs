//! Stub runtime — in-memory browser units for tests and dry runs.
//!
//! Simulates the full `BrowserRuntime` contract without launching
//! anything. Creation failures and probe failures can be scripted to
//! exercise the pool's recovery paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::options::{LaunchOptions, NavigateOptions};
use crate::runtime::{BrowserHandle, BrowserRuntime};

#[derive(Debug, Default)]
struct StubState {
    next_id: u64,
    /// Live unit id → navigations performed on it.
    live: HashMap<u64, Vec<String>>,
    /// Unit ids whose probes are scripted to fail.
    failing_probes: HashSet<u64>,
    /// Remaining `create` calls that fail before creation succeeds again.
    fail_next_creates: u32,
    created_total: u64,
    closed_total: u64,
    /// (unit id, domain) pairs seen by `inject_cookies`.
    cookie_injections: Vec<(u64, String)>,
}

/// An in-memory `BrowserRuntime` with scriptable failures.
#[derive(Debug, Default)]
pub struct StubRuntime {
    state: Mutex<StubState>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` create calls to fail.
    pub async fn fail_next_creates(&self, n: u32) {
        self.state.lock().await.fail_next_creates = n;
    }

    /// Script probes for a unit to fail until `restore_probe`.
    pub async fn fail_probes_for(&self, handle: &BrowserHandle) {
        self.state.lock().await.failing_probes.insert(handle.id());
    }

    pub async fn restore_probe(&self, handle: &BrowserHandle) {
        self.state.lock().await.failing_probes.remove(&handle.id());
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    pub async fn created_total(&self) -> u64 {
        self.state.lock().await.created_total
    }

    pub async fn closed_total(&self) -> u64 {
        self.state.lock().await.closed_total
    }

    /// Domains passed to `inject_cookies`, in call order.
    pub async fn cookie_domains(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .cookie_injections
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// URLs navigated on a unit, in call order.
    pub async fn navigations_for(&self, handle: &BrowserHandle) -> Vec<String> {
        self.state
            .lock()
            .await
            .live
            .get(&handle.id())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserRuntime for StubRuntime {
    async fn create(&self, _options: &LaunchOptions) -> RuntimeResult<BrowserHandle> {
        let mut state = self.state.lock().await;
        if state.fail_next_creates > 0 {
            state.fail_next_creates -= 1;
            return Err(RuntimeError::Launch("scripted create failure".to_string()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id, Vec::new());
        state.created_total += 1;
        debug!(unit = id, "stub unit created");
        Ok(BrowserHandle::new(id))
    }

    async fn navigate(
        &self,
        handle: &BrowserHandle,
        url: &str,
        _options: &NavigateOptions,
    ) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        match state.live.get_mut(&handle.id()) {
            Some(visits) => {
                visits.push(url.to_string());
                Ok(())
            }
            None => Err(RuntimeError::UnknownHandle(handle.id())),
        }
    }

    async fn probe(&self, handle: &BrowserHandle) -> bool {
        let state = self.state.lock().await;
        state.live.contains_key(&handle.id()) && !state.failing_probes.contains(&handle.id())
    }

    async fn close(&self, handle: &BrowserHandle) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        if state.live.remove(&handle.id()).is_some() {
            state.closed_total += 1;
            debug!(unit = handle.id(), "stub unit closed");
        }
        Ok(())
    }

    async fn inject_cookies(&self, handle: &BrowserHandle, domain: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        if !state.live.contains_key(&handle.id()) {
            return Err(RuntimeError::UnknownHandle(handle.id()));
        }
        state
            .cookie_injections
            .push((handle.id(), domain.to_string()));
        Ok(())
    }
}
