//! # warden-process
//!
//! Supervision of one external OS process: spawn with piped stdio, feed its
//! stdin, observe CPU/memory/uptime through a background sampler, and stop
//! it gracefully with a force-kill escalation.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use warden_process::Supervisor;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = Supervisor::new("/srv/game/server")
//!     .with_output_callback(Arc::new(|line| println!("{line}")));
//!
//! supervisor
//!     .start(Path::new("/srv/game"), &["--nogui".to_string()])
//!     .await?;
//! supervisor.send_command("say hello").await?;
//!
//! let state = supervisor.status()?;
//! println!("pid={} cpu={:.1}% mem={:.0}MB", state.pid, state.cpu, state.memory);
//!
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod monitor;
pub mod spec;
pub mod supervisor;

pub use error::{ProcessError, Result};
pub use monitor::ResourceMonitor;
pub use spec::ProcessSpec;
pub use supervisor::{OutputCallback, Supervisor};
