//! # warden-common
//!
//! Shared building blocks for the warden process-supervision workspace:
//! resource snapshots, the rate-limited output buffer, and logging setup.

pub mod logging;
pub mod state;
pub mod throttle;

pub use state::{format_uptime, ProcessState};
pub use throttle::RateLimitBuffer;
