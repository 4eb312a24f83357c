use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for the DependencyWatchdog
#[derive(Debug, Default)]
pub(crate) struct WatchdogStats {
    /// Total number of monitor cycles performed
    cycles: AtomicUsize,
    /// Number of cycles where at least one dependency was unavailable
    failed_cycles: AtomicUsize,
}

impl WatchdogStats {
    /// Get the total number of monitor cycles performed
    pub(crate) fn cycles(&self) -> usize {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Increment the total number of monitor cycles performed
    pub(crate) fn increment_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of cycles with at least one unavailable dependency
    pub(crate) fn failed_cycles(&self) -> usize {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Increment the number of cycles with at least one unavailable dependency
    pub(crate) fn increment_failed_cycles(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }
}
