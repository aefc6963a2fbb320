//! Launch and navigation options.

use std::path::PathBuf;
use std::time::Duration;

/// Launch parameters for new browser units.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Explicit browser executable; `None` lets the runtime autodetect.
    pub executable: Option<PathBuf>,
    /// Extra command-line arguments passed to the browser process.
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            args: Vec::new(),
        }
    }
}

/// Per-navigation parameters.
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    /// Hard cap on how long a navigation may take.
    pub timeout: Duration,
    /// Wait for the network to settle, not just the load event.
    pub wait_for_idle: bool,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_for_idle: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_defaults_are_headless() {
        let options = LaunchOptions::default();
        assert!(options.headless);
        assert!(options.executable.is_none());
        assert!(options.args.is_empty());
    }

    #[test]
    fn navigate_defaults() {
        let options = NavigateOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.wait_for_idle);
    }
}
