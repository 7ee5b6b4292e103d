//! KV-layer errors

/// Errors surfaced by KV implementations
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic)]
pub enum KvError {
    /// Serializable conflict with a concurrently committed transaction.
    /// The retrying wrappers absorb this up to their budget.
    #[error("transaction conflict with a concurrent commit")]
    #[diagnostic(help("retried automatically by the transaction wrappers"))]
    Conflict,

    /// The transaction handle was used after commit.
    #[error("transaction already committed")]
    Used,

    /// A key could not be decoded by the tuple layer.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A versionstamp template was shorter than its placeholder + offset,
    /// or the offset pointed outside the template.
    #[error("malformed versionstamp template: {0}")]
    MalformedTemplate(String),

    /// Backend failure not covered by a more specific variant.
    #[error("kv storage: {0}")]
    Storage(String),
}

impl KvError {
    /// Whether the transaction wrappers should retry on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Conflict)
    }
}

/// Errors that may carry a retryable KV condition
///
/// Implemented by [`KvError`] and by engine error types wrapping it, so the
/// generic transaction wrappers can retry conflicts while surfacing logical
/// errors directly.
pub trait MaybeRetryable {
    /// Whether the operation should be retried in a fresh transaction.
    fn is_retryable(&self) -> bool;
}

impl MaybeRetryable for KvError {
    fn is_retryable(&self) -> bool {
        KvError::is_retryable(self)
    }
}
