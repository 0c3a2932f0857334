//! Handle-addressed registry of supervised processes
//!
//! The single surface external callers use: it translates opaque handles to
//! variant instances and fans process output out through per-handle rate
//! limiting onto one shared event channel. Registries are explicitly
//! constructed values; embed one per host and pass it by reference, there
//! is no global instance.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use warden_common::{ProcessState, RateLimitBuffer};
use warden_process::{OutputCallback, ProcessSpec};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::event::OutputEvent;
use crate::handle::ProcessHandle;
use crate::variant::{ManagedProcess, OrdinaryProcess, ProcessKind, PtyProcess};

struct Entry {
    kind: ProcessKind,
    spec: ProcessSpec,
    variant: Arc<dyn ManagedProcess>,
    buffer: Arc<RateLimitBuffer<String>>,
}

struct Inner {
    config: RegistryConfig,
    entries: RwLock<HashMap<ProcessHandle, Arc<Entry>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<OutputEvent>,
}

/// Registry of supervised processes, addressed by opaque handles.
///
/// Cheap to clone; clones share the same slot table and event channel.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Create a registry with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Create a registry with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// The configuration this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Register a binary under a new handle.
    ///
    /// Relative paths resolve against the configured base directory and the
    /// result must exist on disk. When dedup is on, an identical (resolved
    /// path, kind) registration returns the existing handle instead of
    /// creating a second slot. Must be called from within a Tokio runtime:
    /// the slot's output buffer starts its drain loop immediately.
    pub fn register<I, S>(
        &self,
        kind: ProcessKind,
        program: impl AsRef<Path>,
        args: I,
    ) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = ProcessSpec::resolve(program.as_ref(), &self.inner.config.base_dir)
            .map_err(|e| {
                error!(
                    program = %program.as_ref().display(),
                    error = %e,
                    "registration failed"
                );
                RegistryError::Process(e)
            })?
            .args(args);

        let mut entries = self.inner.entries.write();

        if self.inner.config.dedup_registrations {
            let existing = entries
                .iter()
                .find(|(_, entry)| entry.kind == kind && entry.spec.binary == spec.binary)
                .map(|(handle, _)| *handle);
            if let Some(handle) = existing {
                debug!(%handle, binary = %spec.binary.display(), "reusing existing registration");
                return Ok(handle);
            }
        }

        let handle = ProcessHandle::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let events = self.inner.events.clone();
        let buffer = Arc::new(RateLimitBuffer::with_capacity(
            self.inner.config.flush_interval,
            self.inner.config.queue_capacity,
            move |line| {
                let _ = events.send(OutputEvent { handle, line });
            },
        ));

        let variant: Arc<dyn ManagedProcess> = match kind {
            ProcessKind::Ordinary => Arc::new(OrdinaryProcess::new(spec.clone())),
            ProcessKind::Pty => Arc::new(PtyProcess::new(spec.clone())),
        };

        info!(%handle, kind = %kind, binary = %spec.binary.display(), "process registered");
        entries.insert(
            handle,
            Arc::new(Entry {
                kind,
                spec,
                variant,
                buffer,
            }),
        );
        Ok(handle)
    }

    /// Start the process behind `handle` with its registered arguments.
    pub async fn start(&self, handle: ProcessHandle) -> Result<()> {
        let entry = self.entry(handle)?;
        let buffer = Arc::clone(&entry.buffer);
        let callback: OutputCallback = Arc::new(move |line| buffer.add(line));
        entry
            .variant
            .start(callback, &entry.spec.args)
            .await
            .map_err(|e| self.operation_failed(handle, "start", e))
    }

    /// Stop the process behind `handle`; no-op when nothing runs.
    pub async fn stop(&self, handle: ProcessHandle) -> Result<()> {
        let entry = self.entry(handle)?;
        entry
            .variant
            .stop()
            .await
            .map_err(|e| self.operation_failed(handle, "stop", e))
    }

    /// Write a command line to the console of the process behind `handle`.
    pub async fn send_command(&self, handle: ProcessHandle, command: &str) -> Result<()> {
        let entry = self.entry(handle)?;
        entry
            .variant
            .send_command(command)
            .await
            .map_err(|e| self.operation_failed(handle, "send_command", e))
    }

    /// Resource snapshot of the process behind `handle`, empty when it is
    /// not running.
    pub async fn status(&self, handle: ProcessHandle) -> Result<ProcessState> {
        let entry = self.entry(handle)?;
        entry
            .variant
            .status()
            .await
            .map_err(|e| self.operation_failed(handle, "status", e))
    }

    /// True while the process behind `handle` is alive.
    pub async fn is_running(&self, handle: ProcessHandle) -> Result<bool> {
        let entry = self.entry(handle)?;
        Ok(entry.variant.is_running().await)
    }

    /// Subscribe to the rate-limited output of every registered process.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to the output of one process only.
    pub fn subscribe_handle(
        &self,
        handle: ProcessHandle,
    ) -> Result<mpsc::UnboundedReceiver<OutputEvent>> {
        let _ = self.entry(handle)?;

        let mut events = self.inner.events.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.handle == handle => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%handle, skipped, "output subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    /// All handles issued so far, in allocation order.
    pub fn handles(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<_> = self.inner.entries.read().keys().copied().collect();
        handles.sort();
        handles
    }

    /// Look up a slot, cloning it out so the table lock is released before
    /// any variant method runs. Entries are never removed, so a clone can
    /// not go stale.
    fn entry(&self, handle: ProcessHandle) -> Result<Arc<Entry>> {
        let entries = self.inner.entries.read();
        entries.get(&handle).cloned().ok_or_else(|| {
            error!(%handle, "handle not found");
            RegistryError::HandleNotFound(handle)
        })
    }

    fn operation_failed(
        &self,
        handle: ProcessHandle,
        operation: &'static str,
        source: warden_process::ProcessError,
    ) -> RegistryError {
        error!(%handle, operation, error = %source, "process operation failed");
        RegistryError::Operation {
            handle,
            operation,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tokio::time::timeout;
    use warden_process::ProcessError;

    fn registry_with_scratch_binary() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server"), b"").unwrap();
        let registry = Registry::new(RegistryConfig::default().base_dir(dir.path()));
        (dir, registry)
    }

    #[tokio::test]
    async fn unknown_handles_are_rejected_everywhere() {
        let registry = Registry::with_defaults();
        let ghost = ProcessHandle::new(99);

        assert!(matches!(
            registry.start(ghost).await,
            Err(RegistryError::HandleNotFound(_))
        ));
        assert!(matches!(
            registry.stop(ghost).await,
            Err(RegistryError::HandleNotFound(_))
        ));
        assert!(matches!(
            registry.send_command(ghost, "help").await,
            Err(RegistryError::HandleNotFound(_))
        ));
        assert!(matches!(
            registry.status(ghost).await,
            Err(RegistryError::HandleNotFound(_))
        ));
        assert!(matches!(
            registry.is_running(ghost).await,
            Err(RegistryError::HandleNotFound(_))
        ));
        assert!(matches!(
            registry.subscribe_handle(ghost),
            Err(RegistryError::HandleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn registering_a_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(RegistryConfig::default().base_dir(dir.path()));

        let err = registry
            .register(ProcessKind::Ordinary, "missing-server", Vec::<String>::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Process(ProcessError::BinaryNotFound(_))
        ));
        assert!(registry.handles().is_empty());
    }

    #[tokio::test]
    async fn identical_registrations_share_a_handle() {
        let (_dir, registry) = registry_with_scratch_binary();

        let first = registry
            .register(ProcessKind::Ordinary, "server", ["--nogui"])
            .unwrap();
        let second = registry
            .register(ProcessKind::Ordinary, "server", ["--nogui"])
            .unwrap();
        assert_eq!(first, second);

        // A different kind is a different slot.
        let pty = registry
            .register(ProcessKind::Pty, "server", ["--nogui"])
            .unwrap();
        assert_ne!(first, pty);
        assert_eq!(registry.handles(), vec![first, pty]);
    }

    #[tokio::test]
    async fn dedup_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server"), b"").unwrap();
        let registry = Registry::new(
            RegistryConfig::default()
                .base_dir(dir.path())
                .dedup_registrations(false),
        );

        let first = registry
            .register(ProcessKind::Ordinary, "server", Vec::<String>::new())
            .unwrap();
        let second = registry
            .register(ProcessKind::Ordinary, "server", Vec::<String>::new())
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn stop_on_a_never_started_entry_is_a_noop() {
        let (_dir, registry) = registry_with_scratch_binary();
        let handle = registry
            .register(ProcessKind::Ordinary, "server", Vec::<String>::new())
            .unwrap();

        registry.stop(handle).await.unwrap();
        assert!(!registry.is_running(handle).await.unwrap());
        assert_eq!(registry.status(handle).await.unwrap(), ProcessState::default());
        assert!(matches!(
            registry.send_command(handle, "help").await,
            Err(RegistryError::Operation {
                source: ProcessError::NotRunning,
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lifecycle_with_output_events() {
        let registry = Registry::with_defaults();
        let handle = registry
            .register(
                ProcessKind::Ordinary,
                "/bin/sh",
                ["-c", "echo booted; sleep 5"],
            )
            .unwrap();

        let mut events = registry.subscribe_handle(handle).unwrap();
        registry.start(handle).await.unwrap();
        assert!(registry.is_running(handle).await.unwrap());

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for output event")
            .expect("event channel closed");
        assert_eq!(event.handle, handle);
        assert_eq!(event.line, "[STDOUT] booted");

        let state = registry.status(handle).await.unwrap();
        assert!(!state.pid.is_empty());
        assert!(state.memory >= 0.0);

        registry.stop(handle).await.unwrap();
        assert!(!registry.is_running(handle).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn double_start_replaces_the_child() {
        let registry = Registry::with_defaults();
        let handle = registry
            .register(ProcessKind::Ordinary, "/bin/sh", ["-c", "sleep 30"])
            .unwrap();

        registry.start(handle).await.unwrap();
        let first_pid = registry.status(handle).await.unwrap().pid;

        registry.start(handle).await.unwrap();
        let second_pid = registry.status(handle).await.unwrap().pid;

        assert!(!second_pid.is_empty());
        assert_ne!(first_pid, second_pid);

        registry.stop(handle).await.unwrap();
    }
}
