//! Engine error taxonomy

use heddle_kv::{KvError, MaybeRetryable};
use heddle_repo::RepoError;
use std::error::Error;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage engine
///
/// `NotFound` is a first-class non-exceptional condition: lookups either
/// return a value or report it, and metrics count it separately from real
/// failures. Retryable KV conditions are absorbed by the transaction
/// wrappers; every other variant aborts the transaction with no state
/// mutated.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StoreError {
    /// A primary or secondary lookup did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record is missing a required field.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// An actor is missing a required field.
    #[error("invalid actor: {0}")]
    InvalidActor(String),

    /// A URI failed parsing.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// An optimistic concurrency token did not match, or the actor head
    /// moved between the caller's snapshot and the transactional re-read.
    #[error("concurrent modification")]
    #[diagnostic(help("reload the actor and retry the operation"))]
    ConcurrentModification,

    /// A swap token referenced a record that does not exist.
    #[error("invalid swap: {0}")]
    InvalidSwap(String),

    /// A request carried an unrecognized action or is otherwise malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Signing key parsing or signature production failed.
    #[error("crypto failure")]
    Crypto(#[source] BoxError),

    /// Encoding or decoding of persisted bytes failed.
    #[error("serialization failure")]
    Serialization(#[source] BoxError),

    /// A KV-layer failure not recognized above.
    #[error("storage failure")]
    Storage(#[source] BoxError),

    /// A KV-layer condition the transaction wrappers retry internally.
    #[error("retryable kv condition")]
    Retryable(#[source] KvError),
}

impl StoreError {
    /// Short status label for metrics and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidRecord(_) => "invalid_record",
            StoreError::InvalidActor(_) => "invalid_actor",
            StoreError::InvalidUri(_) => "invalid_uri",
            StoreError::ConcurrentModification => "concurrent_modification",
            StoreError::InvalidSwap(_) => "invalid_swap",
            StoreError::InvalidRequest(_) => "invalid_request",
            StoreError::Crypto(_) => "crypto",
            StoreError::Serialization(_) => "serialization",
            StoreError::Storage(_) => "storage",
            StoreError::Retryable(_) => "retryable",
        }
    }

    /// Whether this is the non-exceptional missing-lookup condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }
}

impl From<KvError> for StoreError {
    fn from(e: KvError) -> Self {
        if e.is_retryable() {
            StoreError::Retryable(e)
        } else {
            StoreError::Storage(Box::new(e))
        }
    }
}

impl From<RepoError> for StoreError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Serialization(source) => StoreError::Serialization(source),
            RepoError::Crypto(source) => StoreError::Crypto(source),
            RepoError::Storage(source) => {
                // A storage failure inside the repo layer may wrap a
                // retryable KV condition; preserve its retryability.
                match source.downcast::<KvError>() {
                    Ok(kv) => StoreError::from(*kv),
                    Err(source) => StoreError::Storage(source),
                }
            }
            other => StoreError::Storage(Box::new(other)),
        }
    }
}

impl MaybeRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Retryable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_conflict_stays_retryable() {
        let e = StoreError::from(KvError::Conflict);
        assert!(e.is_retryable());
        assert_eq!(e.kind(), "retryable");
    }

    #[test]
    fn kv_storage_error_is_terminal() {
        let e = StoreError::from(KvError::Storage("down".into()));
        assert!(!e.is_retryable());
    }

    #[test]
    fn repo_wrapped_conflict_stays_retryable() {
        let repo = RepoError::storage(KvError::Conflict);
        let e = StoreError::from(repo);
        assert!(e.is_retryable());
    }

    #[test]
    fn not_found_is_distinguished() {
        let e = StoreError::not_found("actor did:plc:missing");
        assert!(e.is_not_found());
        assert_eq!(e.kind(), "not_found");
    }
}
