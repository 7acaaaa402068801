//! Filer error types.
//!
//! Absence is not an error: listing and [`crate::filer::Filer::get_record`]
//! report a missing path with the [`crate::record::Record::no_file`]
//! sentinel.  Everything else that can go wrong is a [`FilerError`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = FilerError> = std::result::Result<T, E>;

/// Errors produced by filers, object stores and upload streams.
#[derive(Debug, Error)]
pub enum FilerError {
    /// The object addressed by `path` does not exist.
    #[error("no such file: {path}")]
    NotFound { path: String },

    /// The backend has no mapping for this operation.  Retrying will not help.
    #[error("operation not supported by this backend: {operation}")]
    Unsupported { operation: &'static str },

    /// Paths are absolute and must start with `/`.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A buffered upload failed and its multipart session was aborted.
    #[error("failed to upload: {path}")]
    Upload {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local filesystem failure (spill files, temp directory).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The object store or the network failed.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl FilerError {
    /// Shorthand for [`FilerError::Unsupported`].
    pub fn unsupported(operation: &'static str) -> Self {
        FilerError::Unsupported { operation }
    }

    /// True if the operation can never succeed on this backend.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, FilerError::Unsupported { .. })
    }

    /// True if the failure came from I/O and the call may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FilerError::Backend(_) | FilerError::Io(_) | FilerError::Upload { .. }
        )
    }

    /// True for [`FilerError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FilerError::NotFound { .. })
    }
}
