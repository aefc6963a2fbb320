//! crawlgrid-pool — lifecycle management for pooled browser units.
//!
//! The `BrowserPool` owns every browser unit: creation, health checking,
//! recycling, and safe concurrent acquisition. Callers only ever hold a
//! `ResourceId` and a handle clone; all state transitions happen inside
//! the pool under one lock.
//!
//! # Architecture
//!
//! ```text
//! BrowserPool
//!   ├── HashMap<ResourceId, PooledResource>   (single source of truth)
//!   │   └── ResourceStatus: Warming | Idle | Busy | Draining | Unhealthy
//!   ├── BrowserRuntime                        (create / probe / close units)
//!   ├── SystemProbe                           (memory gate on creation)
//!   ├── Health task                           (periodic probes, idle reaping)
//!   └── broadcast<PoolEvent>                  (lifecycle notifications)
//! ```
//!
//! # Acquisition order
//!
//! `acquire` prefers an idle unit already on the requested domain, then
//! any idle unit (reassigning its domain and warming cookies), then
//! creates a new unit if under `max_size`, and finally reports
//! exhaustion with `None`. Exhaustion is backpressure, not an error.

pub mod error;
pub mod events;
pub mod pool;
pub mod resource;

pub use error::{PoolError, PoolResult};
pub use events::{PoolEvent, RecycleReason};
pub use pool::{AcquiredResource, BrowserPool, PoolConfig, PoolStats};
pub use resource::{PooledResource, ResourceStatus};
