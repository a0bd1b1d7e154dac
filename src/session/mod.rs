pub mod adb;
pub mod batch;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{AdbFsError, Result};

pub use adb::AdbSession;
pub use memory::MemoryDevice;

/// Output of one remote shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Combined stdout/stderr, one entry per line, line endings stripped
    pub lines: Vec<String>,
    /// Exit status reported by the remote shell
    pub status: i32,
}

impl Reply {
    pub fn ok(lines: Vec<String>) -> Self {
        Self { lines, status: 0 }
    }

    pub fn failed(message: impl Into<String>, status: i32) -> Self {
        Self {
            lines: vec![message.into()],
            status,
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// All output joined with newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Classified failure, or `None` if the command succeeded
    pub fn failure(&self) -> Option<RemoteFailure> {
        if self.success() {
            None
        } else {
            Some(RemoteFailure::classify(&self.text()))
        }
    }

    /// Turn a failed reply into an error about `path`
    pub fn check(self, path: &str) -> Result<Self> {
        match self.failure() {
            None => Ok(self),
            Some(failure) => Err(failure.into_error(path)),
        }
    }
}

/// What went wrong with a remote command, classified from its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    NoSuchFile,
    NotADirectory,
    IsADirectory,
    FileExists,
    NotEmpty,
    PermissionDenied,
    DeviceUnavailable(String),
    Other(String),
}

/// Lines adb itself prints when no usable device is attached, e.g.
/// `error: device 'abc' not found` or `adb: no devices/emulators found`
const ADB_PREFIXES: &[&str] = &["error:", "adb:"];
const DEVICE_SUBJECTS: &[&str] = &["device ", "no devices", "no emulators"];

fn is_device_diagnostic(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    ADB_PREFIXES.iter().any(|prefix| {
        lower
            .strip_prefix(prefix)
            .map(str::trim_start)
            .is_some_and(|rest| DEVICE_SUBJECTS.iter().any(|s| rest.starts_with(s)))
    })
}

impl RemoteFailure {
    /// Classify remote error text. Device-level failures win over
    /// path-level ones since they invalidate the rest of the output.
    pub fn classify(text: &str) -> Self {
        if let Some(line) = text.lines().find(|line| is_device_diagnostic(line)) {
            return RemoteFailure::DeviceUnavailable(line.trim().to_string());
        }
        let lower = text.to_ascii_lowercase();
        if text.contains("No such file") {
            RemoteFailure::NoSuchFile
        } else if text.contains("Not a directory") {
            RemoteFailure::NotADirectory
        } else if text.contains("Is a directory") {
            RemoteFailure::IsADirectory
        } else if text.contains("File exists") {
            RemoteFailure::FileExists
        } else if lower.contains("not empty") {
            RemoteFailure::NotEmpty
        } else if text.contains("Permission denied")
            || text.contains("Read-only file system")
            || text.contains("Operation not permitted")
        {
            RemoteFailure::PermissionDenied
        } else {
            RemoteFailure::Other(text.trim().to_string())
        }
    }

    pub fn into_error(self, path: &str) -> AdbFsError {
        let path = path.to_string();
        match self {
            RemoteFailure::NoSuchFile => AdbFsError::NotFound(path),
            RemoteFailure::NotADirectory | RemoteFailure::IsADirectory => {
                AdbFsError::ResourceInvalid(path)
            }
            RemoteFailure::FileExists => AdbFsError::DestinationExists(path),
            RemoteFailure::NotEmpty => AdbFsError::DirectoryNotEmpty(path),
            RemoteFailure::PermissionDenied => AdbFsError::PermissionDenied(path),
            RemoteFailure::DeviceUnavailable(msg) => AdbFsError::DeviceUnavailable(msg),
            RemoteFailure::Other(msg) if msg.is_empty() => AdbFsError::Remote(path),
            RemoteFailure::Other(msg) => AdbFsError::Remote(format!("{}: {}", path, msg)),
        }
    }
}

/// Remote command executor for one device
///
/// Sessions hold no connection state between calls. Transport problems
/// (adb missing, device gone, deadline exceeded) are returned as errors;
/// a command that ran and failed comes back as a [`Reply`] with a non-zero
/// status so the caller can classify it with its own path context.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run several commands in one round trip, one reply per command
    async fn run_batch(&self, commands: &[String]) -> Result<Vec<Reply>>;

    /// Run a single command
    async fn run(&self, command: &str) -> Result<Reply> {
        let mut replies = self.run_batch(&[command.to_string()]).await?;
        replies
            .pop()
            .ok_or_else(|| AdbFsError::Remote(format!("no reply for command: {}", command)))
    }

    /// Read a whole remote file as raw bytes
    async fn read_raw(&self, path: &str) -> Result<Bytes>;

    /// Replace a remote file's contents with raw bytes
    async fn write_raw(&self, path: &str, data: Bytes) -> Result<()>;

    /// Copy a remote file to the local filesystem
    async fn pull(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy a local file to the device
    async fn push(&self, local: &Path, remote: &str) -> Result<()>;

    /// Block until the device is reachable again
    async fn wait_for_device(&self) -> Result<()>;

    /// Human readable name of the endpoint
    fn description(&self) -> String;
}
