//! Watches a directory for the Majdata control file written by the
//! HachimiDX converter and hands the requested project to an editor host.
//!
//! ```no_run
//! use majdata_control::{ControlFileWatcher, LoadError};
//! use std::sync::Arc;
//!
//! # #[tokio::main] async fn main() {
//! let loader = |folder: &str, maidata: &str, track: &str| -> Result<(), LoadError> {
//!     println!("open {folder}/{maidata} with {track}");
//!     Ok(())
//! };
//! let mut watcher = ControlFileWatcher::new(Arc::new(loader));
//! watcher.start_watching();
//! # }
//! ```
pub mod config;
pub mod control_file;
pub mod dispatch;
pub mod loader;
pub mod signals;
pub mod watcher;

pub use control_file::{ControlFileRecord, FormatError, CONTROL_FILE_NAME};
pub use loader::{CommandLoader, LoadError, LogLoader, ProjectLoader};
pub use watcher::{ControlFileWatcher, PassError, PassOutcome, WatchError, WatcherState};
