//! Error types for process supervision

use std::io;
use thiserror::Error;

/// Process supervision errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The configured binary could not be resolved to an existing file
    #[error("executable not found: {0}")]
    BinaryNotFound(String),

    /// A child of this supervisor is still alive
    #[error("a child process is already running with PID {pid}")]
    AlreadyRunning {
        /// PID of the live child
        pid: u32,
    },

    /// The OS refused to spawn the child
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// A stdio pipe or pty device could not be wired up
    #[error("failed to set up {stream} pipe: {detail}")]
    PipeSetupFailed {
        /// Which stream was being wired
        stream: &'static str,
        /// What went wrong
        detail: String,
    },

    /// The operation needs a running child and there is none
    #[error("process is not running")]
    NotRunning,

    /// Writing a command to the child's stdin failed
    #[error("failed to write to process stdin: {0}")]
    WriteFailed(#[source] io::Error),

    /// The child ignored the termination signal and was force-killed
    #[error("process {pid} did not exit within {timeout_secs}s and was force-killed")]
    ForcedKillTimeout {
        /// PID of the killed child
        pid: u32,
        /// Length of the grace window that expired
        timeout_secs: u64,
    },
}

/// Result type for supervision operations
pub type Result<T> = std::result::Result<T, ProcessError>;
