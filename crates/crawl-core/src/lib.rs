pub mod config;
pub mod error;
pub mod job;

pub use config::CrawlConfig;
pub use error::{CoreError, CoreResult};
pub use job::*;
