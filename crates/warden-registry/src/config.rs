//! Registry configuration

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a [`crate::Registry`] instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base directory against which relative binary paths are resolved
    pub base_dir: PathBuf,
    /// Reuse an existing handle when the same (path, kind) is registered
    /// twice. On by default: it stops a double-click in a host UI from
    /// spawning the same workload twice. Turn off for callers that want
    /// several independent instances of one binary.
    pub dedup_registrations: bool,
    /// Tick of the per-process output buffer; one line is delivered per tick
    pub flush_interval: Duration,
    /// Lines retained per process before overflow is shed
    pub queue_capacity: usize,
    /// Capacity of the shared output event channel
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            dedup_registrations: true,
            flush_interval: Duration::from_millis(10),
            queue_capacity: 1000,
            event_capacity: 1024,
        }
    }
}

impl RegistryConfig {
    /// Set the base directory for relative path resolution
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Enable or disable registration dedup
    pub fn dedup_registrations(mut self, dedup: bool) -> Self {
        self.dedup_registrations = dedup;
        self
    }

    /// Set the output flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the per-process output queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}
