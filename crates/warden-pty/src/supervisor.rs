//! Supervision of one child attached to a pseudo-terminal
//!
//! Interactive console programs expect a real terminal device for prompts,
//! line editing, and signal handling; plain pipes make many of them buffer
//! or disable their console entirely. [`PtySupervisor`] mirrors the plain
//! supervisor's contract while the child sits on a pty: output arrives as
//! raw lines (a pty merges stdout and stderr at the device, so there is
//! nothing to tag), commands go through the pty master, and resource
//! sampling, liveness, and stop semantics are identical.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::error::PtyError;
use warden_common::ProcessState;
use warden_process::{OutputCallback, ProcessError, ResourceMonitor, Result};

/// Grace window between the termination signal and force kill.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Extra window for the OS to reap a force-killed child.
const KILL_REAP_PERIOD: Duration = Duration::from_secs(2);

/// Read buffer for the pty master.
const READ_BUFFER_SIZE: usize = 4096;

struct PtyRunning {
    pid: Option<u32>,
    // Keeps the pty device open; dropping it hangs up the child.
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    alive_rx: watch::Receiver<bool>,
    monitor: Option<ResourceMonitor>,
}

/// Supervises exactly one child process attached to a pseudo-terminal.
pub struct PtySupervisor {
    binary: PathBuf,
    env: Vec<(String, String)>,
    output: Option<OutputCallback>,
    cols: u16,
    rows: u16,
    running: Mutex<Option<PtyRunning>>,
    writer: AsyncMutex<Option<Box<dyn Write + Send>>>,
}

impl PtySupervisor {
    /// Create a pty supervisor bound to one executable path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            env: Vec::new(),
            output: None,
            cols: 80,
            rows: 24,
            running: Mutex::new(None),
            writer: AsyncMutex::new(None),
        }
    }

    /// Register a callback for the child's console output lines.
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.output = Some(callback);
        self
    }

    /// Append environment variables to the inherited environment.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Initial terminal dimensions (defaults to 80×24).
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Spawn the child on a fresh pty in `working_dir` with `args`.
    pub async fn start(&self, working_dir: &Path, args: &[String]) -> Result<()> {
        if let Some(running) = self.running.lock().as_ref() {
            if *running.alive_rx.borrow() {
                return Err(ProcessError::AlreadyRunning {
                    pid: running.pid.unwrap_or(0),
                });
            }
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.binary);
        for arg in args {
            cmd.arg(arg);
        }
        cmd.cwd(working_dir);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let pid = child.process_id();
        let killer = child.clone_killer();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Io(std::io::Error::other(e)))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Io(std::io::Error::other(e)))?;

        // The device must always be drained: an undrained pty buffer fills
        // up and blocks the child. Without a callback the lines are dropped.
        let callback = self
            .output
            .clone()
            .unwrap_or_else(|| Arc::new(|_line| {}));
        spawn_pty_reader(reader, callback);

        let (alive_tx, alive_rx) = watch::channel(true);
        tokio::task::spawn_blocking(move || {
            match child.wait() {
                Ok(status) => debug!(pid = ?pid, %status, "pty child exited"),
                Err(e) => warn!(pid = ?pid, error = %e, "failed waiting on pty child"),
            }
            let _ = alive_tx.send(false);
        });

        let monitor = pid.map(ResourceMonitor::spawn);

        *self.writer.lock().await = Some(writer);
        *self.running.lock() = Some(PtyRunning {
            pid,
            master: pair.master,
            killer,
            alive_rx,
            monitor,
        });

        info!(pid = ?pid, binary = %self.binary.display(), "pty process started");
        Ok(())
    }

    /// Stop the child, waiting up to the grace window before force-killing.
    ///
    /// Idempotent no-op when nothing is running; state is reset on every
    /// path out.
    pub async fn stop(&self) -> Result<()> {
        let taken = self.running.lock().take();
        let Some(mut running) = taken else {
            return Ok(());
        };

        *self.writer.lock().await = None;
        if let Some(monitor) = running.monitor.as_mut() {
            monitor.stop().await;
        }

        if !*running.alive_rx.borrow() {
            debug!(pid = ?running.pid, "pty child had already exited; state reset");
            return Ok(());
        }

        let pid = running.pid;
        info!(pid = ?pid, "stopping pty process");
        send_term_signal(pid, &mut running.killer);

        let mut alive_rx = running.alive_rx.clone();
        let graceful = tokio::time::timeout(STOP_GRACE_PERIOD, alive_rx.wait_for(|alive| !alive))
            .await
            .map(|r| r.map(|_| ()));

        match graceful {
            Ok(_) => {
                info!(pid = ?pid, "pty process exited");
                Ok(())
            }
            Err(_) => {
                warn!(
                    pid = ?pid,
                    grace_secs = STOP_GRACE_PERIOD.as_secs(),
                    "graceful stop timed out; force killing"
                );
                if let Err(e) = running.killer.kill() {
                    warn!(pid = ?pid, error = %e, "force kill failed");
                }
                let _ =
                    tokio::time::timeout(KILL_REAP_PERIOD, alive_rx.wait_for(|alive| !alive)).await;
                Err(ProcessError::ForcedKillTimeout {
                    pid: pid.unwrap_or(0),
                    timeout_secs: STOP_GRACE_PERIOD.as_secs(),
                })
            }
        }
    }

    /// Write a command line to the pty, appending a newline when missing.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProcessError::NotRunning)?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| {
                warn!(error = %e, "failed to write command to pty");
                ProcessError::WriteFailed(e)
            })
    }

    /// Current resource snapshot, empty when nothing is running.
    pub fn status(&self) -> Result<ProcessState> {
        let guard = self.running.lock();
        let Some(running) = guard.as_ref() else {
            return Ok(ProcessState::default());
        };
        if !*running.alive_rx.borrow() {
            return Ok(ProcessState::default());
        }
        match (running.pid, running.monitor.as_ref()) {
            (Some(pid), Some(monitor)) => Ok(monitor.process_state(pid)),
            _ => Ok(ProcessState::default()),
        }
    }

    /// True while the pty child is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|running| *running.alive_rx.borrow())
            .unwrap_or(false)
    }

    /// PID of the live child, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        let guard = self.running.lock();
        guard
            .as_ref()
            .filter(|running| *running.alive_rx.borrow())
            .and_then(|running| running.pid)
    }

    /// Resize the terminal seen by the child.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = self.running.lock();
        let running = guard.as_ref().ok_or(ProcessError::NotRunning)?;
        running
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ProcessError::PipeSetupFailed {
                stream: "pty",
                detail: e.to_string(),
            })
    }
}

/// Drain the pty master on a blocking thread, forwarding complete lines.
fn spawn_pty_reader(mut reader: Box<dyn Read + Send>, callback: OutputCallback) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut pending = String::new();
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                    drain_lines(&mut pending, &*callback);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "pty reader closed");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            callback(std::mem::take(&mut pending));
        }
    });
}

/// Emit every complete line in `pending`, leaving any partial tail in place.
fn drain_lines(pending: &mut String, callback: &(dyn Fn(String) + Send + Sync)) {
    while let Some(pos) = pending.find('\n') {
        let mut line: String = pending.drain(..=pos).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        callback(line);
    }
}

#[cfg(unix)]
fn send_term_signal(pid: Option<u32>, killer: &mut Box<dyn ChildKiller + Send + Sync>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match pid {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid = %pid, error = %e, "failed to send SIGTERM");
            }
        }
        None => {
            if let Err(e) = killer.kill() {
                warn!(error = %e, "failed to kill pty child");
            }
        }
    }
}

#[cfg(not(unix))]
fn send_term_signal(pid: Option<u32>, killer: &mut Box<dyn ChildKiller + Send + Sync>) {
    // No polite signal on this platform; the kill is the stop.
    if let Err(e) = killer.kill() {
        warn!(pid = ?pid, error = %e, "failed to kill pty child");
    }
}
