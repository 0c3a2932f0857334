//! Output events fanned out to registry subscribers

use serde::{Deserialize, Serialize};

use crate::handle::ProcessHandle;

/// One rate-limited console line from a registered process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    /// Slot that produced the line
    pub handle: ProcessHandle,
    /// The console line, stream-tagged for ordinary processes
    pub line: String,
}

impl OutputEvent {
    /// Event-channel tag for hosts that route events by name, e.g.
    /// `"process-3"`.
    pub fn channel(&self) -> String {
        self.handle.to_string()
    }
}
