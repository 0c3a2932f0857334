//! Pty device errors

use std::io;
use thiserror::Error;
use warden_process::ProcessError;

/// Errors from the pseudo-terminal device layer
#[derive(Debug, Error)]
pub enum PtyError {
    /// The pty pair could not be opened or cloned
    #[error("failed to open pseudo-terminal: {0}")]
    Open(String),

    /// The child could not be spawned on the slave side
    #[error("failed to spawn process on pseudo-terminal: {0}")]
    Spawn(String),

    /// I/O on the pty master failed
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<PtyError> for ProcessError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::Open(detail) => ProcessError::PipeSetupFailed {
                stream: "pty",
                detail,
            },
            PtyError::Spawn(detail) => ProcessError::SpawnFailed(io::Error::other(detail)),
            PtyError::Io(e) => ProcessError::SpawnFailed(e),
        }
    }
}
