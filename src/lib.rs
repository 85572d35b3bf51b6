//! # Syncstation - Configuration Sync Through a Shared Directory
//!
//! Syncstation keeps user-selected configuration files and directories in
//! sync across computers that share one rendezvous directory (a cloud
//! client's mount point or a git working tree). There is no peer-to-peer
//! networking: every computer runs the same tool and coordinates purely
//! through files in the shared directory.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use syncstation::sync::SyncEngine;
//! use syncstation::types::SyncOperation;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = syncstation::config::LocalConfig::load(&config_path).await?;
//!     let engine = SyncEngine::new(config, &state_dir);
//!     let result = engine.sync(SyncOperation::Smart, None, false).await?;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod backup;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod metadata;
pub mod mover;
pub mod paths;
pub mod pool;
pub mod probe;
pub mod sync;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::LocalConfig;
pub use error::{ErrorKind, SyncError};
pub use metadata::{MetadataStore, RemoveMode, SyncItem};
pub use sync::SyncEngine;
pub use types::{ItemKind, SyncOperation, SyncResult, SyncStatus};

// vim: ts=4
