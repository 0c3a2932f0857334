//! Process variants behind one capability set
//!
//! The registry is polymorphic over a flat capability trait with two
//! concrete implementations: plain-piped children and pty-attached
//! children. Each variant is a thin stateful holder of one supervisor
//! bound to a fixed resolved spec; a fresh supervisor is built per start,
//! so no background task ever survives a stop/restart cycle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use warden_common::ProcessState;
use warden_process::{OutputCallback, ProcessError, ProcessSpec, Supervisor};
use warden_pty::PtySupervisor;

/// Selector for the concrete process implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// Plain pipes; output lines are stream-tagged
    Ordinary,
    /// Pseudo-terminal; for interactive console programs
    Pty,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary => f.write_str("ordinary"),
            Self::Pty => f.write_str("pty"),
        }
    }
}

/// The capability set every process variant exposes.
///
/// `send_command` outside of a running child fails with `NotRunning`;
/// `status` instead returns an empty snapshot, so periodic pollers never
/// need to special-case the gap before the first start.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Start the child, streaming output lines into `output`.
    async fn start(&self, output: OutputCallback, args: &[String]) -> Result<(), ProcessError>;
    /// Stop the child; no-op when nothing runs.
    async fn stop(&self) -> Result<(), ProcessError>;
    /// Write one command line to the child's console.
    async fn send_command(&self, command: &str) -> Result<(), ProcessError>;
    /// True while the child is alive.
    async fn is_running(&self) -> bool;
    /// Resource snapshot, empty when not running.
    async fn status(&self) -> Result<ProcessState, ProcessError>;
}

/// Decouple pipe readers from the consumer: lines hop through an unbounded
/// channel so a slow callback can never stall a reader task.
fn forwarding_callback(output: OutputCallback) -> OutputCallback {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            output(line);
        }
    });
    Arc::new(move |line| {
        let _ = tx.send(line);
    })
}

/// Plain-piped process variant.
pub struct OrdinaryProcess {
    spec: ProcessSpec,
    supervisor: RwLock<Option<Supervisor>>,
}

impl OrdinaryProcess {
    /// Bind a variant to one resolved spec.
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            supervisor: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ManagedProcess for OrdinaryProcess {
    async fn start(&self, output: OutputCallback, args: &[String]) -> Result<(), ProcessError> {
        let mut guard = self.supervisor.write().await;

        // Self-healing restart: a still-running predecessor is stopped and
        // discarded before the fresh supervisor takes its place.
        if let Some(existing) = guard.as_ref() {
            if existing.is_running() {
                info!(
                    binary = %self.spec.binary.display(),
                    "previous child still running; stopping it first"
                );
                existing.stop().await?;
            }
        }

        let supervisor = Supervisor::new(&self.spec.binary)
            .with_env(self.spec.env.clone())
            .with_output_callback(forwarding_callback(output));

        supervisor.start(&self.spec.working_dir, args).await?;
        *guard = Some(supervisor);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProcessError> {
        match self.supervisor.read().await.as_ref() {
            Some(supervisor) => supervisor.stop().await,
            None => Ok(()),
        }
    }

    async fn send_command(&self, command: &str) -> Result<(), ProcessError> {
        let guard = self.supervisor.read().await;
        let supervisor = guard.as_ref().ok_or(ProcessError::NotRunning)?;
        supervisor.send_command(command).await
    }

    async fn is_running(&self) -> bool {
        self.supervisor
            .read()
            .await
            .as_ref()
            .map(Supervisor::is_running)
            .unwrap_or(false)
    }

    async fn status(&self) -> Result<ProcessState, ProcessError> {
        match self.supervisor.read().await.as_ref() {
            Some(supervisor) => supervisor.status(),
            None => Ok(ProcessState::default()),
        }
    }
}

/// Pty-attached process variant.
pub struct PtyProcess {
    spec: ProcessSpec,
    supervisor: RwLock<Option<PtySupervisor>>,
}

impl PtyProcess {
    /// Bind a variant to one resolved spec.
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            supervisor: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ManagedProcess for PtyProcess {
    async fn start(&self, output: OutputCallback, args: &[String]) -> Result<(), ProcessError> {
        let mut guard = self.supervisor.write().await;

        if let Some(existing) = guard.as_ref() {
            if existing.is_running() {
                info!(
                    binary = %self.spec.binary.display(),
                    "previous pty child still running; stopping it first"
                );
                existing.stop().await?;
            }
        }

        let supervisor = PtySupervisor::new(&self.spec.binary)
            .with_env(self.spec.env.clone())
            .with_output_callback(forwarding_callback(output));

        supervisor.start(&self.spec.working_dir, args).await?;
        *guard = Some(supervisor);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProcessError> {
        match self.supervisor.read().await.as_ref() {
            Some(supervisor) => supervisor.stop().await,
            None => Ok(()),
        }
    }

    async fn send_command(&self, command: &str) -> Result<(), ProcessError> {
        let guard = self.supervisor.read().await;
        let supervisor = guard.as_ref().ok_or(ProcessError::NotRunning)?;
        supervisor.send_command(command).await
    }

    async fn is_running(&self) -> bool {
        self.supervisor
            .read()
            .await
            .as_ref()
            .map(PtySupervisor::is_running)
            .unwrap_or(false)
    }

    async fn status(&self) -> Result<ProcessState, ProcessError> {
        match self.supervisor.read().await.as_ref() {
            Some(supervisor) => supervisor.status(),
            None => Ok(ProcessState::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn dummy_spec() -> (tempfile::TempDir, ProcessSpec) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server");
        fs::write(&file, b"").unwrap();
        let spec = ProcessSpec::resolve(&file, dir.path()).unwrap();
        (dir, spec)
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ProcessKind::Ordinary).unwrap(), "\"ordinary\"");
        assert_eq!(serde_json::to_string(&ProcessKind::Pty).unwrap(), "\"pty\"");
        assert_eq!(ProcessKind::Pty.to_string(), "pty");
    }

    #[tokio::test]
    async fn fresh_variant_has_permissive_status_and_strict_commands() {
        let (_dir, spec) = dummy_spec();
        let variant = OrdinaryProcess::new(spec);

        assert!(!variant.is_running().await);
        assert_eq!(variant.status().await.unwrap(), ProcessState::default());
        assert!(matches!(
            variant.send_command("help").await,
            Err(ProcessError::NotRunning)
        ));
        variant.stop().await.unwrap();
    }

    #[tokio::test]
    async fn fresh_pty_variant_behaves_identically() {
        let (_dir, spec) = dummy_spec();
        let variant = PtyProcess::new(spec);

        assert!(!variant.is_running().await);
        assert_eq!(variant.status().await.unwrap(), ProcessState::default());
        assert!(matches!(
            variant.send_command("help").await,
            Err(ProcessError::NotRunning)
        ));
        variant.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ordinary_start_replaces_running_child() {
        let spec = ProcessSpec::resolve("/bin/sh", "/").unwrap();
        let variant = OrdinaryProcess::new(spec);
        let output: OutputCallback = Arc::new(|_| {});
        let args = vec!["-c".to_string(), "sleep 30".to_string()];

        variant.start(Arc::clone(&output), &args).await.unwrap();
        let first_pid = variant.status().await.unwrap().pid;
        assert!(!first_pid.is_empty());

        // Restart without an explicit stop: the old child must be replaced.
        variant.start(output, &args).await.unwrap();
        let second_pid = variant.status().await.unwrap().pid;
        assert!(!second_pid.is_empty());
        assert_ne!(first_pid, second_pid);

        variant.stop().await.unwrap();
        assert!(!variant.is_running().await);
    }
}
