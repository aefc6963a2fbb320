//! Browser runtime trait — the contract the pool drives browsers through.

use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::options::{LaunchOptions, NavigateOptions};

/// Opaque token for one live browser unit (process, context, or tab).
///
/// Handles are cheap to clone. Only the runtime that issued a handle
/// can interpret it; the pool just carries it around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrowserHandle {
    id: u64,
}

impl BrowserHandle {
    /// Issue a new handle. Runtime implementations call this; the pool
    /// never does.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Driver for real browser units.
///
/// Implementations wrap CDP, WebDriver, or a remote browser farm. The
/// pool is the only caller and serializes per-unit access, so
/// implementations only need to be safe across distinct handles.
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    /// Launch one browser unit.
    async fn create(&self, options: &LaunchOptions) -> RuntimeResult<BrowserHandle>;

    /// Navigate a unit to a URL and wait for the page to load.
    async fn navigate(
        &self,
        handle: &BrowserHandle,
        url: &str,
        options: &NavigateOptions,
    ) -> RuntimeResult<()>;

    /// Liveness probe. `false` means the unit is gone or wedged.
    async fn probe(&self, handle: &BrowserHandle) -> bool;

    /// Tear a unit down. Idempotent; closing a closed unit is not an error.
    async fn close(&self, handle: &BrowserHandle) -> RuntimeResult<()>;

    /// Warm a unit's profile with stored cookies for a domain.
    ///
    /// Called when the pool reassigns a unit to a new domain. Best-effort;
    /// callers log failures and carry on.
    async fn inject_cookies(&self, handle: &BrowserHandle, domain: &str) -> RuntimeResult<()>;
}
