//! System probes — memory and CPU readings behind a testable seam.
//!
//! The pool gates on-demand creation on available memory and the
//! autoscaler sizes its headroom from the same figures, so both take a
//! `SystemProbe` instead of reading the host directly.

use sysinfo::System;

const MB: u64 = 1024 * 1024;

/// Read-only view of host memory and CPU capacity.
pub trait SystemProbe: Send + Sync {
    /// Megabytes of memory currently available to new work.
    fn available_memory_mb(&self) -> u64;

    /// Total physical memory in megabytes.
    fn total_memory_mb(&self) -> u64;

    /// Logical CPU count.
    fn cpu_count(&self) -> usize;
}

/// Live readings from the host via `sysinfo`.
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    pub fn new() -> Self {
        Self
    }

    fn refreshed() -> System {
        let mut sys = System::new();
        sys.refresh_memory();
        sys
    }
}

impl SystemProbe for SysinfoProbe {
    fn available_memory_mb(&self) -> u64 {
        Self::refreshed().available_memory() / MB
    }

    fn total_memory_mb(&self) -> u64 {
        Self::refreshed().total_memory() / MB
    }

    fn cpu_count(&self) -> usize {
        num_cpus::get()
    }
}

/// Pinned readings for tests.
#[derive(Debug, Clone)]
pub struct FixedProbe {
    pub available_mb: u64,
    pub total_mb: u64,
    pub cpus: usize,
}

impl FixedProbe {
    pub fn new(available_mb: u64, total_mb: u64, cpus: usize) -> Self {
        Self {
            available_mb,
            total_mb,
            cpus,
        }
    }

    /// A roomy host: 8 GiB free of 16 GiB, 8 cpus.
    pub fn roomy() -> Self {
        Self::new(8192, 16384, 8)
    }
}

impl SystemProbe for FixedProbe {
    fn available_memory_mb(&self) -> u64 {
        self.available_mb
    }

    fn total_memory_mb(&self) -> u64 {
        self.total_mb
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_probe_reports_nonzero_memory() {
        let probe = SysinfoProbe::new();
        assert!(probe.total_memory_mb() > 0);
        assert!(probe.cpu_count() > 0);
    }

    #[test]
    fn fixed_probe_returns_pinned_values() {
        let probe = FixedProbe::new(2048, 8192, 4);
        assert_eq!(probe.available_memory_mb(), 2048);
        assert_eq!(probe.total_memory_mb(), 8192);
        assert_eq!(probe.cpu_count(), 4);
    }
}
