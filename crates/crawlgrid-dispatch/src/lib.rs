//! crawlgrid-dispatch — the crawl loop tying the grid together.
//!
//! The dispatcher drains the scheduler through the pool: acquire a unit
//! warm for the busiest domain, pop a job, run it through the executor
//! (HTTP first, browser on fallback), and feed every outcome back into
//! the routing statistics. Backlog depth flows to the autoscaler.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::run
//!   ├── DomainScheduler        (next job, routing stats, progress)
//!   ├── BrowserPool            (unit acquisition and release)
//!   ├── JobExecutor            (actual fetch + extraction)
//!   │     └── ScriptedExecutor (tests and dry runs)
//!   ├── AutoScaler             (fed queue depth; nudged on exhaustion)
//!   └── worker tasks           (one per in-flight job)
//! ```

pub mod dispatcher;
pub mod executor;

pub use dispatcher::{DispatchConfig, Dispatcher};
pub use executor::{JobExecutor, ScriptedExecutor};
