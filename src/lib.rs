//! adbfs: a directory-cached filesystem view of an Android device over adb
//!
//! # Architecture
//!
//! - **Session**: runs shell commands on the device. [`session::AdbSession`]
//!   drives the `adb` binary; [`session::MemoryDevice`] emulates a device in
//!   process for tests and dry runs.
//! - **Listing**: parses `ls -l` output from both toolbox and toybox devices.
//! - **Cache**: per-directory listings with explicit fresh/stale state.
//! - **Filesystem**: [`fs::AdbFs`] exposes the usual file operations on top
//!   of the session and the cache, all serialized behind one lock.
//! - **Shell**: the interactive `adbfs` transfer shell.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use adbfs::config::Config;
//! use adbfs::fs::{AdbFs, ListOptions};
//! use adbfs::session::AdbSession;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("adbfs.yaml".as_ref())?;
//! let session = Arc::new(AdbSession::from_config(&config.device));
//! let fs = AdbFs::new(session, config.fs_options())?;
//!
//! for name in fs.listdir("/sdcard", &ListOptions::new().wildcard("*.jpg"))? {
//!     println!("{}", name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod fs;
pub mod listing;
pub mod path;
pub mod session;
pub mod shell;

pub use error::{AdbFsError, Result};
pub use fs::{AdbFile, AdbFs, FsOptions, Info, ListOptions};
