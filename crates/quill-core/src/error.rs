//! Error types for quill-core

use thiserror::Error;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a repeated attachment-upload authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAuthFailure {
    /// The credential is past its expiry and could not be refreshed.
    ExpiredCredential,
    /// The backend rejected the write for this identity.
    PermissionDenied,
    /// The configured owner does not match the signed-in identity.
    IdentityMismatch,
    /// None of the known causes matched.
    Unknown,
}

impl std::fmt::Display for UploadAuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ExpiredCredential => "expired credential",
            Self::PermissionDenied => "permission denied",
            Self::IdentityMismatch => "identity mismatch",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Errors that can occur in quill-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed remote row; skipped per row, never fatal to a run
    #[error("Invalid remote row: {0}")]
    Validation(String),

    /// Expired or invalid credential
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Write denied for the current identity
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Network or server failure; aborts the remaining phases of a run
    #[error("Transport error: {0}")]
    Transport(String),

    /// Classified attachment-upload authorization failure
    #[error("Attachment upload authorization failed ({kind}): {message}")]
    UploadAuth {
        /// Failure classification
        kind: UploadAuthFailure,
        /// Human-readable detail
        message: String,
    },

    /// Blob/object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local store error
    #[error("Local store error: {0}")]
    Store(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cooperative cancellation observed at a checkpoint
    #[error("Sync run cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns true when the error is an authorization failure eligible for
    /// the single refresh-and-retry in the attachment upload path.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Permission(_))
    }
}
