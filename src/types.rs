//! Error taxonomy shared by the sampler, the platform backends and the
//! filter compiler.
//!
//! Platform calls classify their failures as [`TaskscopeError::NotFound`],
//! [`TaskscopeError::PermissionDenied`], [`TaskscopeError::Unsupported`] or
//! [`TaskscopeError::Transient`]; the loader's tolerance policy is written
//! against exactly these four variants.

use thiserror::Error;

/// Error types that can occur while sampling the system.
#[derive(Error, Debug)]
pub enum TaskscopeError {
    /// The entity (usually a process) vanished between enumeration and read.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insufficient permissions to read the entity.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The counter or feature is not available on this hardware or driver.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A read failed in a way that may succeed on the next tick.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A ring-buffer range request fell outside the buffer.
    #[error("Range {start}..={end} out of bounds for capacity {capacity}")]
    OutOfRange {
        start: usize,
        end: usize,
        capacity: usize,
    },

    /// `update` was called on a loader that never ran `init`.
    #[error("Metrics loader used before initialization")]
    NotInitialized,

    /// A configuration value is outside its valid domain.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The current platform is not supported.
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    /// A filter expression failed to compile.
    #[error("Invalid filter at position {position}: {message}")]
    Filter { position: usize, message: String },

    /// Generic I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse system data.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TaskscopeError {
    /// Maps an I/O error onto the platform taxonomy.
    pub fn from_io(context: impl Into<String>, err: std::io::Error) -> Self {
        let context = context.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => TaskscopeError::NotFound(context),
            std::io::ErrorKind::PermissionDenied => TaskscopeError::PermissionDenied(context),
            std::io::ErrorKind::Unsupported => TaskscopeError::Unsupported(context),
            _ => TaskscopeError::Transient(format!("{context}: {err}")),
        }
    }
}

/// Type alias for Results that may contain TaskscopeError.
pub type Result<T> = std::result::Result<T, TaskscopeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_from_io_classification() {
        let err = TaskscopeError::from_io("pid 4", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, TaskscopeError::NotFound(_)));

        let err = TaskscopeError::from_io(
            "pid 4",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, TaskscopeError::PermissionDenied(_)));

        let err = TaskscopeError::from_io("pid 4", io::Error::other("EAGAIN"));
        assert!(matches!(err, TaskscopeError::Transient(_)));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = TaskscopeError::OutOfRange {
            start: 2,
            end: 9,
            capacity: 5,
        };
        assert_eq!(
            err.to_string(),
            "Range 2..=9 out of bounds for capacity 5"
        );
    }
}
