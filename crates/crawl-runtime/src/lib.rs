//! crawl-runtime — the boundary between crawlgrid and real browsers.
//!
//! Crawlgrid never talks to a browser directly; everything goes through
//! the `BrowserRuntime` trait. A production deployment plugs in a CDP or
//! WebDriver implementation; tests and dry runs use the in-memory
//! `StubRuntime`. The crate also hosts the `SystemProbe` seam that the
//! pool and autoscaler read memory/CPU figures through.
//!
//! # Architecture
//!
//! ```text
//! BrowserRuntime (trait)
//!   ├── create(LaunchOptions)        → BrowserHandle
//!   ├── navigate / probe / close
//!   ├── inject_cookies               (profile warm-up on domain switch)
//!   └── StubRuntime                  (scriptable in-memory units)
//!
//! SystemProbe (trait)
//!   ├── SysinfoProbe                 (live host readings)
//!   └── FixedProbe                   (pinned readings for tests)
//! ```

pub mod error;
pub mod options;
pub mod runtime;
pub mod stub;
pub mod system;

pub use error::{RuntimeError, RuntimeResult};
pub use options::{LaunchOptions, NavigateOptions};
pub use runtime::{BrowserHandle, BrowserRuntime};
pub use stub::StubRuntime;
pub use system::{FixedProbe, SysinfoProbe, SystemProbe};
