//! Error types for roundtable-state

use thiserror::Error;

/// Errors produced by snapshot and artifact stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under the given digest
    #[error("object not found: {digest}")]
    NotFound { digest: String },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Artifact name is empty, absolute, or escapes the store root
    #[error("invalid artifact name: {name}")]
    InvalidName { name: String },

    /// Stored bytes no longer hash to their address
    #[error("corrupt object {digest}: content hashes to {actual}")]
    Corrupt { digest: String, actual: String },

    /// Index or pointer file could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking filesystem task panicked or was cancelled
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
