//! # warden-registry
//!
//! The addressable surface of the warden process-supervision core: a
//! registry maps opaque handles to process variants (plain-piped or
//! pty-attached) and streams their console output as rate-limited,
//! handle-tagged events.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use warden_registry::{ProcessKind, Registry, RegistryConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new(RegistryConfig::default().base_dir("/srv/servers"));
//!
//! let handle = registry.register(ProcessKind::Ordinary, "paper/run.sh", ["--nogui"])?;
//! let mut events = registry.subscribe();
//!
//! registry.start(handle).await?;
//! registry.send_command(handle, "say hello").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {}", event.channel(), event.line);
//! }
//!
//! registry.stop(handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod registry;
pub mod variant;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use event::OutputEvent;
pub use handle::ProcessHandle;
pub use registry::Registry;
pub use variant::{ManagedProcess, OrdinaryProcess, ProcessKind, PtyProcess};
