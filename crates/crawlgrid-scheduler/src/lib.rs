//! crawlgrid-scheduler — domain-aware job queues with adaptive routing.
//!
//! Jobs are grouped by domain so that a browser unit working
//! `shop.example` keeps getting `shop.example` jobs while they last
//! (warm cookies, warm caches). Per-domain fetch statistics decide
//! whether new jobs should even attempt plain HTTP or go straight to a
//! browser.
//!
//! # Architecture
//!
//! ```text
//! DomainScheduler
//!   ├── HashMap<Domain, DomainQueue>
//!   │     ├── VecDeque<Job>            (pending, undispatched)
//!   │     ├── active slots             (units working the domain)
//!   │     └── RoutingStats             (HTTP vs browser history)
//!   ├── slot → domain affinity         (sticky dispatch)
//!   └── crawl progress counters
//! ```
//!
//! The scheduler is plain state with no interior locking; callers that
//! share it across tasks wrap it in a mutex.

pub mod error;
pub mod queue;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use queue::{DomainQueue, RoutingStats};
pub use scheduler::{DomainScheduler, Progress};
