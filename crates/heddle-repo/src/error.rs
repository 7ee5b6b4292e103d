//! Error types for repository primitives

use cid::Cid;
use std::error::Error;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository primitive errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RepoError {
    /// A referenced block is not present in storage.
    #[error("block not found: {0}")]
    MissingBlock(Cid),

    /// An MST key failed validation.
    #[error("invalid mst key {key:?}: {reason}")]
    #[diagnostic(help("MST keys must match [a-zA-Z0-9._:~-/]+, max 256 bytes"))]
    InvalidKey {
        /// The offending key
        key: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// An MST node violated the tree's structural invariants.
    #[error("invalid mst structure: {0}")]
    InvalidMst(String),

    /// A commit envelope could not be interpreted.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// A mutation was attempted through a read-only block store binding.
    #[error("block write requires a write transaction")]
    RequiresTransaction,

    /// Key parsing or signature production failed.
    #[error("crypto failure")]
    Crypto(#[source] BoxError),

    /// DAG-CBOR encode or decode failed.
    #[error("serialization failed")]
    Serialization(#[source] BoxError),

    /// CAR encoding or decoding failed.
    #[error("car failure")]
    Car(#[source] BoxError),

    /// Underlying block storage failed. The source may carry a retryable
    /// KV-layer condition; callers that care inspect it via
    /// [`std::error::Error::source`].
    #[error("block storage failure")]
    Storage(#[source] BoxError),
}

impl RepoError {
    /// Wrap a storage backend failure.
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(source))
    }

    /// Wrap a serialization failure.
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::Serialization(Box::new(source))
    }

    /// Wrap a crypto failure.
    pub fn crypto(source: impl Error + Send + Sync + 'static) -> Self {
        Self::Crypto(Box::new(source))
    }

    /// Wrap a CAR failure.
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::Car(Box::new(source))
    }

    /// The boxed source of a storage failure, if this is one.
    pub fn storage_source(&self) -> Option<&BoxError> {
        match self {
            RepoError::Storage(source) => Some(source),
            _ => None,
        }
    }
}
