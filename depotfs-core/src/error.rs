//! Error types for the depotfs engine and its remote transport.

use crate::types::DepotPath;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a remote depot transport.
///
/// Cloneable so that a single failed fetch can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepotError {
    /// The request did not complete within the transport's deadline.
    #[error("depot request '{request}' timed out after {after:?}")]
    Timeout { request: String, after: Duration },

    /// The depot server could not be reached.
    #[error("depot unreachable: {0}")]
    Unreachable(String),

    /// The depot answered but refused the request.
    #[error("depot rejected '{request}': {message}")]
    Rejected { request: String, message: String },

    /// The requested file or changelist does not exist on the depot.
    #[error("depot has no such file: {0}")]
    NotFound(String),
}

/// Comprehensive error type for all engine operations.
#[derive(Debug, Error)]
pub enum DepotFsError {
    /// No entry and no directory children at the path.
    #[error("Path not found: {path}")]
    NotFound { path: DepotPath },

    /// create/mkdir on a path that is already present.
    #[error("Path already exists: {path}")]
    AlreadyExists { path: DepotPath },

    /// Expected a directory but found a file.
    #[error("Not a directory: {path}")]
    NotADirectory { path: DepotPath },

    /// Expected a file but found a directory.
    #[error("Is a directory: {path}")]
    IsADirectory { path: DepotPath },

    /// A remote transport call failed or timed out.
    #[error("Remote depot unavailable during {operation}")]
    RemoteUnavailable {
        operation: &'static str,
        #[source]
        source: DepotError,
    },

    /// A host filesystem operation on the override tree failed.
    #[error("Local I/O error on {path}")]
    LocalIo {
        path: DepotPath,
        #[source]
        source: std::io::Error,
    },

    /// Destructive operation requested against a path only the depot backs.
    #[error("Operation '{operation}' not supported on depot-backed path: {path}")]
    NotSupported {
        operation: &'static str,
        path: DepotPath,
    },

    /// A path segment uses the name prefix reserved for promotion staging.
    #[error("Reserved name in path: {path}")]
    ReservedName { path: DepotPath },
}

impl DepotFsError {
    pub(crate) fn remote(operation: &'static str, source: DepotError) -> Self {
        DepotFsError::RemoteUnavailable { operation, source }
    }

    pub(crate) fn local(path: &DepotPath, source: std::io::Error) -> Self {
        DepotFsError::LocalIo {
            path: path.clone(),
            source,
        }
    }

    /// Maps this error onto the status vocabulary handed to the kernel-facing
    /// adapter.
    pub fn status(&self) -> Status {
        match self {
            DepotFsError::NotFound { .. } => Status::NotFound,
            DepotFsError::AlreadyExists { .. } => Status::AlreadyExists,
            DepotFsError::NotADirectory { .. } => Status::NotADirectory,
            DepotFsError::IsADirectory { .. } => Status::IsADirectory,
            DepotFsError::RemoteUnavailable { .. } | DepotFsError::LocalIo { .. } => {
                Status::IoError
            }
            DepotFsError::NotSupported { .. } | DepotFsError::ReservedName { .. } => {
                Status::NotSupported
            }
        }
    }
}

/// Status codes returned to the kernel-facing adaptation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    IoError,
    NotSupported,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::NotFound => "not found",
            Status::AlreadyExists => "already exists",
            Status::IsADirectory => "is a directory",
            Status::NotADirectory => "not a directory",
            Status::IoError => "i/o error",
            Status::NotSupported => "not supported",
        };
        f.write_str(name)
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DepotFsError>;
