//! crawlgrid-autoscale — queue-driven pool sizing with memory guards.
//!
//! Watches pool occupancy and scheduler backlog, and resizes the pool
//! between its bounds. Decisions are a pure function of the inputs;
//! the surrounding machinery adds cooldowns, a memory gate, and a
//! periodic evaluation loop.
//!
//! # Scaling Algorithm
//!
//! ```text
//! busy_ratio = busy / total
//!
//! if busy_ratio > scale_up_threshold and queue_depth > 0:
//!     add = min(ceil(queue_depth / 5),
//!               max_scale_up_per_cycle,
//!               memory headroom in whole units)
//!     ScaleUp(total + add)
//!
//! if busy_ratio < scale_down_threshold and queue_depth == 0 and idle > 1:
//!     remove = min(floor(idle * 0.3), max_scale_down_per_cycle)
//!     ScaleDown(total - remove)
//! ```
//!
//! A cooldown window between scaling actions prevents thrashing; the
//! dispatcher can bypass it when the pool is exhausted outright.

pub mod scaler;

pub use scaler::{AutoScaler, ScaleDecision, ScalerConfig, ScalerError, ScalerEvent, ScalerResult};
