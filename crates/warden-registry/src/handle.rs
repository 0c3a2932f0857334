//! Opaque process handles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier naming one registry slot.
///
/// Handles are allocated by registration and never destroyed; a slot
/// outlives any number of start/stop cycles of its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessHandle(u64);

impl ProcessHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric form of the handle.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_event_tag_convention() {
        assert_eq!(ProcessHandle::new(3).to_string(), "process-3");
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&ProcessHandle::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: ProcessHandle = serde_json::from_str("7").unwrap();
        assert_eq!(back, ProcessHandle::new(7));
    }
}
