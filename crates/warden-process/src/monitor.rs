//! Background resource sampling for a supervised process
//!
//! CPU accounting is delta-based: a sample only means something relative to
//! the previous one, so a dedicated task refreshes on a fixed tick and
//! status queries read the latest cached value instead of touching the OS.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use warden_common::{format_uptime, ProcessState};

/// Tick between resource samples; also the staleness bound of status reads.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Raw per-core percentages are halved relative to what task managers show
/// once divided across all logical cores; this factor matches their scale.
const TASK_MANAGER_SCALE: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
struct ResourceSample {
    /// CPU percentage on the single-core scale, pre-normalization
    cpu_percent: f64,
    /// Resident set size in bytes
    memory_bytes: u64,
    /// Process creation time, seconds since the epoch; 0 when unreadable
    start_time_secs: u64,
}

/// Periodic sampler for one PID, caching the latest reading.
pub struct ResourceMonitor {
    cache: Arc<RwLock<ResourceSample>>,
    logical_cores: usize,
    shutdown_tx: Option<mpsc::Sender<()>>,
    sample_task: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    /// Start sampling `pid` on the standard interval.
    pub fn spawn(pid: u32) -> Self {
        Self::spawn_with_interval(pid, SAMPLE_INTERVAL)
    }

    pub(crate) fn spawn_with_interval(pid: u32, interval: Duration) -> Self {
        let cache = Arc::new(RwLock::new(ResourceSample::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut sys = System::new();
        sys.refresh_cpu();
        let logical_cores = sys.cpus().len();

        let shared = Arc::clone(&cache);
        let sample_task = tokio::spawn(async move {
            let pid = Pid::from_u32(pid);
            let refresh = ProcessRefreshKind::new().with_cpu().with_memory();

            // The first reading establishes the delta baseline and its CPU
            // value is discarded; memory and creation time are already valid.
            if !sys.refresh_process_specifics(pid, refresh) {
                warn!(pid = %pid, "process disappeared before the first resource sample");
                return;
            }
            if let Some(process) = sys.process(pid) {
                *shared.write() = ResourceSample {
                    cpu_percent: 0.0,
                    memory_bytes: process.memory(),
                    start_time_secs: process.start_time(),
                };
            }

            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !sys.refresh_process_specifics(pid, refresh) {
                            debug!(pid = %pid, "resource sampling ended: process is gone");
                            break;
                        }
                        let Some(process) = sys.process(pid) else {
                            break;
                        };
                        *shared.write() = ResourceSample {
                            cpu_percent: f64::from(process.cpu_usage()),
                            memory_bytes: process.memory(),
                            start_time_secs: process.start_time(),
                        };
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(pid = %pid, "resource monitor stopped");
                        break;
                    }
                }
            }
        });

        Self {
            cache,
            logical_cores,
            shutdown_tx: Some(shutdown_tx),
            sample_task: Some(sample_task),
        }
    }

    /// Build a status snapshot for `pid` from the cached sample.
    ///
    /// Never samples synchronously; staleness is bounded by [`SAMPLE_INTERVAL`].
    pub fn process_state(&self, pid: u32) -> ProcessState {
        let sample = *self.cache.read();

        let run_time = if sample.start_time_secs == 0 {
            "unknown".to_string()
        } else {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format_uptime(now.saturating_sub(sample.start_time_secs))
        };

        ProcessState {
            pid: pid.to_string(),
            cpu: normalize_cpu(sample.cpu_percent, self.logical_cores),
            memory: sample.memory_bytes as f64 / 1024.0 / 1024.0,
            run_time,
        }
    }

    /// Stop the sampling task and wait for it to wind down.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.sample_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.sample_task.take() {
            task.abort();
        }
    }
}

/// Spread the single-core percentage over all logical cores, rescale to the
/// task-manager convention, and clamp into `[0, 100]`.
fn normalize_cpu(raw_percent: f64, logical_cores: usize) -> f64 {
    if logical_cores == 0 {
        return raw_percent.clamp(0.0, 100.0);
    }
    ((raw_percent / logical_cores as f64) * TASK_MANAGER_SCALE).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_normalization_spreads_and_clamps() {
        assert_eq!(normalize_cpu(0.0, 8), 0.0);
        assert_eq!(normalize_cpu(80.0, 8), 20.0);
        assert_eq!(normalize_cpu(800.0, 8), 100.0);
        // No core count available: clamp only.
        assert_eq!(normalize_cpu(180.0, 0), 100.0);
    }

    #[tokio::test]
    async fn own_process_is_sampled() {
        let pid = std::process::id();
        let mut monitor = ResourceMonitor::spawn_with_interval(pid, Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(400)).await;

        let state = monitor.process_state(pid);
        assert_eq!(state.pid, pid.to_string());
        assert!(state.memory > 0.0, "test process should have resident memory");
        assert_ne!(state.run_time, "");
        assert!((0.0..=100.0).contains(&state.cpu));

        monitor.stop().await;
    }

    #[tokio::test]
    async fn unknown_pid_leaves_empty_sample() {
        // PID near the top of the space is almost certainly unused.
        let mut monitor = ResourceMonitor::spawn_with_interval(u32::MAX - 7, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = monitor.process_state(u32::MAX - 7);
        assert_eq!(state.memory, 0.0);
        assert_eq!(state.run_time, "unknown");

        monitor.stop().await;
    }
}
