//! Retrying transaction wrappers
//!
//! Every engine operation runs inside one of these helpers. The body closure
//! receives a fresh transaction handle per attempt; retryable errors
//! (serialization conflicts) restart the body until the retry budget or the
//! deadline runs out, at which point the underlying retryable error is
//! surfaced as-is. Logical errors abort immediately.

use crate::error::{KvError, MaybeRetryable};
use crate::kv::{Kv, Transaction};
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry budget for a transactional operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Wall-clock budget across all attempts.
    pub timeout: Duration,
    /// Maximum number of retries after the first attempt.
    pub retry_limit: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_limit: 100,
        }
    }
}

/// Run `body` in a write transaction, committing on success.
///
/// The error type is generic so engine-level errors wrapping [`KvError`] flow
/// through unchanged; only errors reporting themselves retryable restart the
/// attempt.
pub async fn transact<K, T, E, F, Fut>(kv: &K, options: RetryOptions, body: F) -> Result<T, E>
where
    K: Kv,
    E: From<KvError> + MaybeRetryable,
    F: Fn(K::Tx) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = Instant::now() + options.timeout;
    let mut attempt: u32 = 0;
    loop {
        let tx = kv.transaction()?;
        let error = match body(tx.clone()).await {
            Ok(value) => match tx.commit().await {
                Ok(_) => return Ok(value),
                Err(e) => E::from(e),
            },
            Err(e) => e,
        };
        if !error.is_retryable() || attempt >= options.retry_limit || Instant::now() >= deadline {
            return Err(error);
        }
        attempt += 1;
        tracing::trace!(attempt, "retrying transaction after conflict");
    }
}

/// Run `body` in a read-only transaction (never committed).
pub async fn read_only<K, T, E, F, Fut>(kv: &K, options: RetryOptions, body: F) -> Result<T, E>
where
    K: Kv,
    E: From<KvError> + MaybeRetryable,
    F: Fn(K::Tx) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = Instant::now() + options.timeout;
    let mut attempt: u32 = 0;
    loop {
        let tx = kv.transaction()?;
        match body(tx).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < options.retry_limit && Instant::now() < deadline => {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Transaction;
    use crate::memory::MemoryKv;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn commits_on_success() {
        let kv = MemoryKv::new();
        let result: Result<(), KvError> = transact(&kv, RetryOptions::default(), |tx| async move {
            tx.set(b"k", b"v");
            Ok(())
        })
        .await;
        result.unwrap();

        let tx = kv.transaction().unwrap();
        assert!(tx.get(b"k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let kv = MemoryKv::new();
        let setup = kv.transaction().unwrap();
        setup.set(b"count", &0i64.to_le_bytes());
        setup.commit().await.unwrap();

        // Interfering writer bumps the key once, after the body's first read.
        let attempts = Arc::new(AtomicU32::new(0));
        let interfering = kv.clone();
        let counted = attempts.clone();
        let result: Result<i64, KvError> =
            transact(&kv, RetryOptions::default(), move |tx| {
                let interfering = interfering.clone();
                let counted = counted.clone();
                async move {
                    let value = tx.get(b"count").await?.unwrap();
                    let current = i64::from_le_bytes(value[..8].try_into().unwrap());
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        let other = interfering.transaction()?;
                        other.set(b"count", &100i64.to_le_bytes());
                        other.commit().await?;
                    }
                    tx.set(b"count", &(current + 1).to_le_bytes());
                    Ok(current + 1)
                }
            })
            .await;

        // First attempt conflicts, second sees the interfering write.
        assert_eq!(result.unwrap(), 101);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn surfaces_logical_errors_without_retry() {
        let kv = MemoryKv::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let result: Result<(), KvError> = transact(&kv, RetryOptions::default(), move |_tx| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(KvError::Storage("boom".into()))
            }
        })
        .await;
        assert!(matches!(result.unwrap_err(), KvError::Storage(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_retryable_error() {
        let kv = MemoryKv::new();
        let options = RetryOptions {
            retry_limit: 2,
            ..Default::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let result: Result<(), KvError> = transact(&kv, options, move |_tx| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(KvError::Conflict)
            }
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
