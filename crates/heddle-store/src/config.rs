//! Engine configuration

use heddle_kv::RetryOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::Store`]
///
/// There is no global state in the engine; everything it needs arrives
/// through this struct and the handles passed to `open`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster descriptor file for the backing KV, where the binding needs
    /// one. Unused by the in-memory KV.
    pub cluster_file: Option<PathBuf>,

    /// KV client API version.
    pub api_version: u32,

    /// Hard per-transaction wall-clock budget.
    pub transaction_timeout: Duration,

    /// Retry budget per transaction for retryable KV errors.
    pub transaction_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_file: None,
            api_version: 710,
            transaction_timeout: Duration::from_secs(5),
            transaction_retry_limit: 100,
        }
    }
}

impl Config {
    pub(crate) fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            timeout: self.transaction_timeout,
            retry_limit: self.transaction_retry_limit,
        }
    }
}
