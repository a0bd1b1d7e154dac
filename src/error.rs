use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for adbfs operations
#[derive(Error, Debug)]
pub enum AdbFsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Resource is of the wrong type: {0}")]
    ResourceInvalid(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    #[error("Parent directory is missing: {0}")]
    ParentMissing(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Refusing to remove the root directory: {0}")]
    RemoveRoot(String),

    #[error("Operation {op} failed: {path}")]
    OperationFailed { op: &'static str, path: String },

    #[error("Too many levels of symbolic links: {0}")]
    LinkCycle(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Remote command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AdbFsError {
    /// Map the error onto the closest `std::io::ErrorKind`
    pub fn to_io_kind(&self) -> io::ErrorKind {
        match self {
            AdbFsError::NotFound(_) => io::ErrorKind::NotFound,
            AdbFsError::ResourceInvalid(_) => io::ErrorKind::InvalidInput,
            AdbFsError::DestinationExists(_) => io::ErrorKind::AlreadyExists,
            AdbFsError::ParentMissing(_) => io::ErrorKind::NotFound,
            AdbFsError::DirectoryNotEmpty(_) => io::ErrorKind::Other,
            AdbFsError::RemoveRoot(_) => io::ErrorKind::PermissionDenied,
            AdbFsError::OperationFailed { .. } => io::ErrorKind::Other,
            AdbFsError::LinkCycle(_) => io::ErrorKind::InvalidData,
            AdbFsError::DeviceUnavailable(_) => io::ErrorKind::NotConnected,
            AdbFsError::Timeout { .. } => io::ErrorKind::TimedOut,
            AdbFsError::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            AdbFsError::Remote(_) => io::ErrorKind::Other,
            AdbFsError::Io(e) => e.kind(),
            AdbFsError::Config(_) => io::ErrorKind::InvalidInput,
            AdbFsError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
        }
    }

    /// True when the device itself went away, as opposed to a path-level failure
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, AdbFsError::DeviceUnavailable(_))
    }

    /// True when the command never produced a usable answer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AdbFsError::DeviceUnavailable(_) | AdbFsError::Timeout { .. } | AdbFsError::Io(_)
        )
    }
}

impl From<AdbFsError> for io::Error {
    fn from(err: AdbFsError) -> Self {
        match err {
            AdbFsError::Io(e) => e,
            other => io::Error::new(other.to_io_kind(), other),
        }
    }
}

/// Result type alias for adbfs operations
pub type Result<T> = std::result::Result<T, AdbFsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kind_mapping() {
        assert_eq!(
            AdbFsError::NotFound("/a".into()).to_io_kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            AdbFsError::DestinationExists("/a".into()).to_io_kind(),
            io::ErrorKind::AlreadyExists
        );
        assert_eq!(
            AdbFsError::Timeout {
                command: "ls".into(),
                after: Duration::from_secs(1)
            }
            .to_io_kind(),
            io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn test_into_io_error_keeps_inner_io() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let converted: io::Error = AdbFsError::Io(inner).into();
        assert_eq!(converted.kind(), io::ErrorKind::BrokenPipe);

        let converted: io::Error = AdbFsError::LinkCycle("/l".into()).into();
        assert_eq!(converted.kind(), io::ErrorKind::InvalidData);
        assert!(converted.to_string().contains("/l"));
    }
}
