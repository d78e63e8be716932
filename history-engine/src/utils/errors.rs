//! Error types for the history engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification exposed to callers.
///
/// Every [`EngineError`] maps onto exactly one kind; callers decide whether
/// to retry or surface based on the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ReadError,
    WriteError,
    ValidationError,
    ConcurrencyConflict,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("Read error on {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Write error on {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation already in progress for {0}")]
    ConcurrencyConflict(String),

    #[error("Invalid content in {}: {message}", path.display())]
    Content { path: PathBuf, message: String },

    #[error("Failed to delete {} of {} backups for {identifier}", remaining.len(), remaining.len() + deleted.len())]
    PartialDelete {
        identifier: String,
        deleted: Vec<String>,
        remaining: Vec<String>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Write {
            path: path.into(),
            source,
        }
    }

    pub fn content(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        EngineError::Content {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Read { .. } | EngineError::Content { .. } => ErrorKind::ReadError,
            EngineError::Serialization(_) => ErrorKind::ReadError,
            EngineError::Write { .. } | EngineError::PartialDelete { .. } => ErrorKind::WriteError,
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
        }
    }

    /// Whether the whole operation may succeed if the caller tries again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Read { source, .. } | EngineError::Write { source, .. } => {
                is_transient(source)
            }
            EngineError::ConcurrencyConflict(_) => true,
            _ => false,
        }
    }

    /// True when the error is a read of a path that does not exist.
    pub fn is_missing_path(&self) -> bool {
        matches!(self, EngineError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// I/O failures worth a second attempt inside the engine.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(EngineError::not_found("Backup", "x").kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::read("/a", io::Error::from(io::ErrorKind::PermissionDenied)).kind(),
            ErrorKind::ReadError
        );
        assert_eq!(
            EngineError::write("/a", io::Error::from(io::ErrorKind::PermissionDenied)).kind(),
            ErrorKind::WriteError
        );
        assert_eq!(
            EngineError::Validation("bad".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            EngineError::ConcurrencyConflict("a.yaml".into()).kind(),
            ErrorKind::ConcurrencyConflict
        );
    }

    #[test]
    fn test_retryable() {
        let timed_out = EngineError::write("/a", io::Error::from(io::ErrorKind::TimedOut));
        assert!(timed_out.is_retryable());

        let denied = EngineError::read("/a", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_retryable());
        assert!(!EngineError::not_found("Config", "x").is_retryable());
    }

    #[test]
    fn test_missing_path() {
        let missing = EngineError::read("/a", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_missing_path());
        assert!(!EngineError::not_found("Config", "x").is_missing_path());
    }

    #[test]
    fn test_partial_delete_message() {
        let err = EngineError::PartialDelete {
            identifier: "automations.yaml/abc".into(),
            deleted: vec!["a".into(), "b".into()],
            remaining: vec!["c".into()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to delete 1 of 3 backups for automations.yaml/abc"
        );
    }
}
