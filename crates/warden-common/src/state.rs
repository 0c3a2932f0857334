//! Resource usage snapshots for supervised processes

use serde::{Deserialize, Serialize};

/// Point-in-time resource usage of a supervised process.
///
/// Produced on demand from cached monitor samples; an all-empty snapshot
/// means the subject is not running. Status polls deliberately get this
/// zero value instead of an error so callers on a timer need no
/// special-casing before the first start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Process id as a decimal string, empty when not running.
    pub pid: String,
    /// Normalized CPU percentage in `[0, 100]`.
    pub cpu: f64,
    /// Resident-set memory in megabytes, 0 when unavailable.
    pub memory: f64,
    /// Human-readable elapsed time since spawn, `"unknown"` when the
    /// creation time cannot be read.
    pub run_time: String,
}

impl ProcessState {
    /// True if this snapshot carries no live-process data.
    pub fn is_empty(&self) -> bool {
        self.pid.is_empty()
    }
}

/// Formats elapsed seconds as a compact duration string, e.g. `"1h 3m 17s"`.
pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
