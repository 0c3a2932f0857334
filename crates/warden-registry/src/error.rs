//! Registry-level errors

use thiserror::Error;
use warden_process::ProcessError;

use crate::handle::ProcessHandle;

/// Errors surfaced by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No slot exists for the given handle
    #[error("no process registered for handle {0}")]
    HandleNotFound(ProcessHandle),

    /// A delegated operation failed; carries the handle for diagnostics
    #[error("{operation} failed for {handle}: {source}")]
    Operation {
        /// Slot the operation targeted
        handle: ProcessHandle,
        /// Operation name, e.g. `"start"`
        operation: &'static str,
        /// Underlying supervision error
        #[source]
        source: ProcessError,
    },

    /// Registration-time failure, e.g. an unresolvable binary path
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
