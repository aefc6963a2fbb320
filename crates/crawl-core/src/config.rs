//! crawlgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CoreResult;

/// File-facing configuration for a crawlgrid deployment.
///
/// Every section and field is optional; consumers fill in defaults when
/// mapping onto the immutable runtime configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub pool: Option<PoolSection>,
    pub scaler: Option<ScalerSection>,
    pub dispatch: Option<DispatchSection>,
    pub runtime: Option<RuntimeSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSection {
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub warmup_count: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    pub health_check_interval_secs: Option<u64>,
    pub max_jobs_per_resource: Option<u32>,
    pub memory_threshold_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalerSection {
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub cooldown_secs: Option<u64>,
    pub memory_per_resource_mb: Option<u64>,
    pub min_available_memory_mb: Option<u64>,
    pub check_interval_secs: Option<u64>,
    pub max_scale_up_per_cycle: Option<u32>,
    pub max_scale_down_per_cycle: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSection {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSection {
    pub headless: Option<bool>,
    pub executable: Option<String>,
    pub args: Option<Vec<String>>,
    pub navigation_timeout_secs: Option<u64>,
}

impl CrawlConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CrawlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a fully populated config suitable for a single host.
    pub fn scaffold() -> Self {
        CrawlConfig {
            pool: Some(PoolSection {
                min_size: Some(2),
                max_size: Some(10),
                warmup_count: Some(3),
                idle_timeout_secs: Some(300),
                health_check_interval_secs: Some(30),
                max_jobs_per_resource: Some(20),
                memory_threshold_mb: Some(1024),
            }),
            scaler: Some(ScalerSection {
                scale_up_threshold: Some(0.8),
                scale_down_threshold: Some(0.3),
                cooldown_secs: Some(60),
                memory_per_resource_mb: Some(512),
                min_available_memory_mb: Some(1024),
                check_interval_secs: Some(30),
                max_scale_up_per_cycle: Some(3),
                max_scale_down_per_cycle: Some(2),
            }),
            dispatch: Some(DispatchSection {
                poll_interval_ms: Some(50),
            }),
            runtime: Some(RuntimeSection {
                headless: Some(true),
                executable: None,
                args: Some(vec![]),
                navigation_timeout_secs: Some(30),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_round_trips() {
        let config = CrawlConfig::scaffold();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[pool]"));
        assert!(toml_str.contains("max_size = 10"));

        let parsed: CrawlConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.pool.unwrap().max_size, Some(10));
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[pool]
min_size = 4

[scaler]
cooldown_secs = 120
"#;
        let config: CrawlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pool.unwrap().min_size, Some(4));
        assert_eq!(config.scaler.unwrap().cooldown_secs, Some(120));
        assert!(config.dispatch.is_none());
    }

    #[test]
    fn parse_empty_config() {
        let config: CrawlConfig = toml::from_str("").unwrap();
        assert!(config.pool.is_none());
        assert!(config.runtime.is_none());
    }
}
