//! # warden-pty
//!
//! Pseudo-terminal supervision for warden: the same spawn/feed/observe/stop
//! contract as `warden-process`, with the child attached to a real terminal
//! device so interactive server consoles keep their prompts and line
//! editing.

pub mod error;
pub mod supervisor;

pub use error::PtyError;
pub use supervisor::PtySupervisor;
