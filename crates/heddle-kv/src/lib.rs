//! Transactional ordered key-value interface
//!
//! The storage engine runs against any KV exposing:
//!
//! - binary keys and values with total lexicographic order
//! - serializable transactions with optimistic retry-on-conflict
//! - point get/set/clear, bounded range scans (forward and reverse)
//! - 64-bit atomic add on 8-byte little-endian counters
//! - versionstamped keys and values assigned at commit time
//! - a watch primitive resolving when a key's value changes
//!
//! [`Kv`] and [`Transaction`] capture that contract. [`MemoryKv`] is a
//! serializable in-memory implementation used by tests and embedded callers;
//! production deployments bind the same traits to a distributed cluster.
//!
//! Key construction goes through the tuple layer ([`tuple`]) and named
//! [`Subspace`]s so every logical index owns a disjoint prefix.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod kv;
pub mod memory;
pub mod retry;
pub mod subspace;
pub mod tuple;
pub mod versionstamp;

pub use error::{KvError, MaybeRetryable};
pub use kv::{KeyRange, KeyValue, Kv, Transaction, NO_LIMIT};
pub use memory::{MemoryKv, MemoryTransaction};
pub use retry::{RetryOptions, read_only, transact};
pub use subspace::Subspace;
pub use versionstamp::Versionstamp;
