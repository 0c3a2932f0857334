//! Ownership and observation of one external OS process
//!
//! A [`Supervisor`] owns at most one live child at a time: it spawns the
//! binary, wires the stdio pipes, reaps the exit in the background, keeps a
//! resource monitor ticking, and tears everything down on stop. All methods
//! are safe under concurrent access; the internal lock is only ever held for
//! short field reads and writes, never across pipe I/O.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessError, Result};
use crate::monitor::ResourceMonitor;
use warden_common::ProcessState;

/// Grace window between the termination signal and force kill.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Extra window for the OS to reap a force-killed child.
const KILL_REAP_PERIOD: Duration = Duration::from_secs(2);

/// Callback invoked with each stream-tagged output line.
pub type OutputCallback = Arc<dyn Fn(String) + Send + Sync>;

/// State that only exists while a child is alive or being torn down.
struct Running {
    pid: u32,
    alive_rx: watch::Receiver<bool>,
    kill_tx: Option<oneshot::Sender<()>>,
    monitor: ResourceMonitor,
}

/// Supervises exactly one OS child process at a time.
pub struct Supervisor {
    binary: PathBuf,
    env: Vec<(String, String)>,
    output: Option<OutputCallback>,
    running: RwLock<Option<Running>>,
    stdin: Mutex<Option<ChildStdin>>,
}

impl Supervisor {
    /// Create a supervisor bound to one executable path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            env: Vec::new(),
            output: None,
            running: RwLock::new(None),
            stdin: Mutex::new(None),
        }
    }

    /// Register a callback for the child's console output.
    ///
    /// Without a callback stdout and stderr are discarded and no reader
    /// tasks are spawned. Lines arrive tagged `"[STDOUT] ..."` or
    /// `"[STDERR] ..."`, in production order within each stream.
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.output = Some(callback);
        self
    }

    /// Append environment variables to the inherited environment.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Spawn the child in `working_dir` with `args`.
    ///
    /// Returns once the OS confirms the spawn; readiness of whatever the
    /// child serves is the caller's concern. Fails with `AlreadyRunning`
    /// while a previous child of this supervisor is alive.
    pub async fn start(&self, working_dir: &Path, args: &[String]) -> Result<()> {
        if let Some(running) = self.running.read().as_ref() {
            if *running.alive_rx.borrow() {
                return Err(ProcessError::AlreadyRunning { pid: running.pid });
            }
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        if self.output.is_some() {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(binary = %self.binary.display(), error = %e, "failed to spawn process");
            ProcessError::SpawnFailed(e)
        })?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let _ = child.start_kill();
                return Err(ProcessError::SpawnFailed(std::io::Error::other(
                    "child exited before a PID could be read",
                )));
            }
        };

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.start_kill();
                return Err(pipe_setup_failed("stdin"));
            }
        };

        if let Some(callback) = &self.output {
            let stdout = match child.stdout.take() {
                Some(stdout) => stdout,
                None => {
                    let _ = child.start_kill();
                    return Err(pipe_setup_failed("stdout"));
                }
            };
            let stderr = match child.stderr.take() {
                Some(stderr) => stderr,
                None => {
                    let _ = child.start_kill();
                    return Err(pipe_setup_failed("stderr"));
                }
            };
            spawn_line_reader(stdout, "[STDOUT]", Arc::clone(callback));
            spawn_line_reader(stderr, "[STDERR]", Arc::clone(callback));
        }

        let (alive_tx, alive_rx) = watch::channel(true);
        let (kill_tx, kill_rx) = oneshot::channel();
        spawn_reaper(child, pid, alive_tx, kill_rx);

        let monitor = ResourceMonitor::spawn(pid);

        *self.stdin.lock().await = Some(stdin);
        *self.running.write() = Some(Running {
            pid,
            alive_rx,
            kill_tx: Some(kill_tx),
            monitor,
        });

        info!(pid = %pid, binary = %self.binary.display(), "process started");
        Ok(())
    }

    /// Stop the child, waiting up to the grace window before force-killing.
    ///
    /// Idempotent: succeeds as a no-op when nothing is running. Internal
    /// state is reset on every path out, including the force-kill path,
    /// which reports [`ProcessError::ForcedKillTimeout`].
    pub async fn stop(&self) -> Result<()> {
        let taken = self.running.write().take();
        let Some(mut running) = taken else {
            return Ok(());
        };

        *self.stdin.lock().await = None;
        running.monitor.stop().await;

        if !*running.alive_rx.borrow() {
            debug!(pid = %running.pid, "process had already exited; state reset");
            return Ok(());
        }

        let pid = running.pid;
        info!(pid = %pid, "stopping process");
        send_term_signal(pid, &mut running.kill_tx);

        let mut alive_rx = running.alive_rx.clone();
        let graceful = tokio::time::timeout(STOP_GRACE_PERIOD, alive_rx.wait_for(|alive| !alive))
            .await
            .map(|r| r.map(|_| ()));

        match graceful {
            Ok(_) => {
                info!(pid = %pid, "process exited");
                Ok(())
            }
            Err(_) => {
                warn!(
                    pid = %pid,
                    grace_secs = STOP_GRACE_PERIOD.as_secs(),
                    "graceful stop timed out; force killing"
                );
                if let Some(kill_tx) = running.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                let _ =
                    tokio::time::timeout(KILL_REAP_PERIOD, alive_rx.wait_for(|alive| !alive)).await;
                Err(ProcessError::ForcedKillTimeout {
                    pid,
                    timeout_secs: STOP_GRACE_PERIOD.as_secs(),
                })
            }
        }
    }

    /// Write a command line to the child's stdin, appending a newline when
    /// missing. Fails with `NotRunning` when stdin is unavailable.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ProcessError::NotRunning)?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            error!(error = %e, "failed to write command to process stdin");
            ProcessError::WriteFailed(e)
        })
    }

    /// Current resource snapshot, empty when nothing is running.
    ///
    /// Never blocks and never fails on a not-running subject: periodic
    /// pollers read this before the first start and after every exit.
    pub fn status(&self) -> Result<ProcessState> {
        let guard = self.running.read();
        let Some(running) = guard.as_ref() else {
            return Ok(ProcessState::default());
        };
        if !*running.alive_rx.borrow() {
            return Ok(ProcessState::default());
        }
        Ok(running.monitor.process_state(running.pid))
    }

    /// True while the OS child is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .read()
            .as_ref()
            .map(|running| *running.alive_rx.borrow())
            .unwrap_or(false)
    }

    /// PID of the live child, if any.
    pub fn pid(&self) -> Option<u32> {
        let guard = self.running.read();
        guard
            .as_ref()
            .filter(|running| *running.alive_rx.borrow())
            .map(|running| running.pid)
    }
}

fn pipe_setup_failed(stream: &'static str) -> ProcessError {
    error!(stream, "pipe handle missing after spawn");
    ProcessError::PipeSetupFailed {
        stream,
        detail: "handle missing after spawn".to_string(),
    }
}

/// Drain one output pipe line by line into the callback.
fn spawn_line_reader<R>(reader: R, tag: &'static str, callback: OutputCallback) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => callback(format!("{tag} {line}")),
                Ok(None) => break,
                Err(e) => {
                    debug!(tag, error = %e, "output pipe closed with an error");
                    break;
                }
            }
        }
    })
}

/// Reap the child's exit without blocking any caller, force-killing on
/// request. Flips the shared liveness flag once the exit is observed.
fn spawn_reaper(
    mut child: Child,
    pid: u32,
    alive_tx: watch::Sender<bool>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => debug!(pid = %pid, %status, "process exited"),
                Err(e) => warn!(pid = %pid, error = %e, "failed waiting on process exit"),
            },
            _ = &mut kill_rx => {
                if let Err(e) = child.start_kill() {
                    warn!(pid = %pid, error = %e, "force kill failed");
                }
                match child.wait().await {
                    Ok(status) => debug!(pid = %pid, %status, "process exited after kill"),
                    Err(e) => warn!(pid = %pid, error = %e, "failed waiting on killed process"),
                }
            }
        }
        let _ = alive_tx.send(false);
    });
}

#[cfg(unix)]
fn send_term_signal(pid: u32, _kill_tx: &mut Option<oneshot::Sender<()>>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid = %pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_term_signal(_pid: u32, kill_tx: &mut Option<oneshot::Sender<()>>) {
    // No polite signal on this platform; the kill request is the stop.
    if let Some(tx) = kill_tx.take() {
        let _ = tx.send(());
    }
}
