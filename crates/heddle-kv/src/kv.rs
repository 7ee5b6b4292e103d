//! KV client and transaction traits

use crate::error::KvError;
use crate::versionstamp::Versionstamp;
use bytes::Bytes;

/// Result alias for KV operations.
pub type Result<T> = std::result::Result<T, KvError>;

/// Limit value meaning "no limit" for range scans.
pub const NO_LIMIT: usize = usize::MAX;

/// A key-value pair returned by a range scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The full key
    pub key: Bytes,
    /// The value
    pub value: Bytes,
}

/// A half-open key range `[begin, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub begin: Vec<u8>,
    /// Exclusive upper bound
    pub end: Vec<u8>,
}

impl KeyRange {
    /// Whether `key` falls within the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_slice() <= key && key < self.end.as_slice()
    }

    /// Narrow the lower bound to start strictly after `cursor`.
    pub fn after(mut self, cursor: &[u8]) -> Self {
        let after = crate::tuple::key_after(cursor);
        if after > self.begin {
            self.begin = after;
        }
        self
    }

    /// Narrow the upper bound to end (exclusively) at `cursor`.
    pub fn before(mut self, cursor: &[u8]) -> Self {
        if cursor.to_vec() < self.end {
            self.end = cursor.to_vec();
        }
        self
    }
}

/// A serializable KV transaction
///
/// Handles are cheap to clone and share one underlying transaction; this
/// mirrors how cluster client bindings expose transactions. Mutations are
/// buffered locally and become visible to other transactions only after
/// [`Transaction::commit`]. Reads observe the transaction's own buffered
/// writes.
///
/// Suspension happens only at the async I/O boundaries (`get`, `get_range`,
/// `commit`); everything between them is synchronous.
#[trait_variant::make(Send)]
pub trait Transaction: Clone + Send + Sync + 'static {
    /// Read a single key.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Scan up to `limit` pairs in `range`, in key order (reversed when
    /// `reverse` is set).
    async fn get_range(&self, range: &KeyRange, limit: usize, reverse: bool)
    -> Result<Vec<KeyValue>>;

    /// Buffer a write.
    fn set(&self, key: &[u8], value: &[u8]);

    /// Buffer a deletion.
    fn clear(&self, key: &[u8]);

    /// Buffer deletion of every key in `range`.
    fn clear_range(&self, range: &KeyRange);

    /// Atomically add `delta` to the 8-byte little-endian counter at `key`.
    /// A missing key counts as zero. Adds never conflict with each other.
    fn atomic_add(&self, key: &[u8], delta: i64);

    /// Write `value` at a key derived from `key_template` by filling its
    /// versionstamp placeholder at commit time (see
    /// [`crate::versionstamp::key_template`]).
    fn set_versionstamped_key(&self, key_template: &[u8], value: &[u8]);

    /// Write at `key` a value derived from `value_template` by filling its
    /// versionstamp placeholder at commit time.
    fn set_versionstamped_value(&self, key: &[u8], value_template: &[u8]);

    /// Commit. Returns the versionstamp assigned to this transaction.
    ///
    /// Fails with a retryable [`KvError::Conflict`] when a concurrently
    /// committed transaction invalidated this transaction's reads; nothing is
    /// persisted in that case.
    async fn commit(&self) -> Result<Versionstamp>;
}

/// A KV client handle
///
/// Cloneable; all clones share the same underlying store.
#[trait_variant::make(Send)]
pub trait Kv: Clone + Send + Sync + 'static {
    /// The transaction type of this client.
    type Tx: Transaction;

    /// Open a new transaction.
    fn transaction(&self) -> Result<Self::Tx>;

    /// Resolve once the value at `key` changes from its value at
    /// registration time.
    async fn watch(&self, key: &[u8]) -> Result<()>;
}
