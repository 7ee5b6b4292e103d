//! Serializable in-memory KV
//!
//! A single-process implementation of [`Kv`] with the same transaction
//! contract as a distributed cluster: optimistic serializable transactions,
//! commit-time versionstamps, atomic adds, and key watches. It backs the test
//! suites and embedded single-node deployments.
//!
//! Concurrency control is optimistic: reads are tracked per key and per
//! range, and commit validates that nothing read was modified by a
//! transaction that committed after this one began. Validation failure
//! surfaces as a retryable [`KvError::Conflict`].

use crate::error::KvError;
use crate::kv::{KeyRange, KeyValue, Kv, Result, Transaction};
use crate::versionstamp::{self, Versionstamp};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex};

/// Decode an 8-byte little-endian counter, zero-padding short values.
fn counter_value(value: Option<&Bytes>) -> i64 {
    let mut buf = [0u8; 8];
    if let Some(bytes) = value {
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
    }
    i64::from_le_bytes(buf)
}

fn counter_bytes(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

#[derive(Debug, Clone)]
enum Mutation {
    Set(Bytes),
    Clear,
    Add(i64),
}

#[derive(Debug, Clone)]
enum StampedWrite {
    Key { template: Vec<u8>, value: Bytes },
    Value { key: Vec<u8>, template: Vec<u8> },
}

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<Vec<u8>, Bytes>,
    versions: BTreeMap<Vec<u8>, u64>,
    commit_version: u64,
}

impl State {
    fn range_bounds(range: &KeyRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (
            Bound::Included(range.begin.clone()),
            Bound::Excluded(range.end.clone()),
        )
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    commits: tokio::sync::watch::Sender<u64>,
}

/// In-memory serializable KV store
#[derive(Debug, Clone)]
pub struct MemoryKv {
    shared: Arc<Shared>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        let (commits, _) = tokio::sync::watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                commits,
            }),
        }
    }

    /// Number of committed keys, for tests.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().data.len()
    }

    /// Whether the store holds no committed keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl Kv for MemoryKv {
    type Tx = MemoryTransaction;

    fn transaction(&self) -> Result<Self::Tx> {
        let read_version = self.shared.state.lock().unwrap().commit_version;
        Ok(MemoryTransaction {
            shared: self.shared.clone(),
            inner: Arc::new(Mutex::new(TxState {
                read_version,
                reads: BTreeSet::new(),
                range_reads: Vec::new(),
                writes: BTreeMap::new(),
                stamped: Vec::new(),
                committed: false,
            })),
        })
    }

    async fn watch(&self, key: &[u8]) -> Result<()> {
        // Subscribe before sampling so a commit between the two is observed
        // in the sample rather than missed.
        let mut rx = self.shared.commits.subscribe();
        let initial = self.shared.state.lock().unwrap().data.get(key).cloned();
        loop {
            rx.changed()
                .await
                .map_err(|_| KvError::Storage("kv dropped".into()))?;
            let current = self.shared.state.lock().unwrap().data.get(key).cloned();
            if current != initial {
                return Ok(());
            }
        }
    }
}

#[derive(Debug)]
struct TxState {
    read_version: u64,
    reads: BTreeSet<Vec<u8>>,
    range_reads: Vec<KeyRange>,
    writes: BTreeMap<Vec<u8>, Mutation>,
    stamped: Vec<StampedWrite>,
    committed: bool,
}

/// Transaction handle for [`MemoryKv`]
///
/// Clones share the same buffered state.
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    inner: Arc<Mutex<TxState>>,
}

impl MemoryTransaction {
    fn with_state<T>(&self, f: impl FnOnce(&mut TxState, &mut State) -> Result<T>) -> Result<T> {
        // Lock order: transaction state, then shared state.
        let mut tx = self.inner.lock().unwrap();
        if tx.committed {
            return Err(KvError::Used);
        }
        let mut state = self.shared.state.lock().unwrap();
        f(&mut tx, &mut state)
    }

    fn buffer(&self, key: &[u8], mutation: Mutation) {
        let mut tx = self.inner.lock().unwrap();
        tx.writes.insert(key.to_vec(), mutation);
    }
}

impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.with_state(|tx, state| {
            if let Some(mutation) = tx.writes.get(key) {
                return Ok(match mutation {
                    Mutation::Set(value) => Some(value.clone()),
                    Mutation::Clear => None,
                    Mutation::Add(delta) => {
                        // The result depends on the committed base value.
                        tx.reads.insert(key.to_vec());
                        Some(counter_bytes(counter_value(state.data.get(key)) + delta))
                    }
                });
            }
            tx.reads.insert(key.to_vec());
            Ok(state.data.get(key).cloned())
        })
    }

    async fn get_range(
        &self,
        range: &KeyRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<KeyValue>> {
        self.with_state(|tx, state| {
            tx.range_reads.push(range.clone());

            let bounds = State::range_bounds(range);
            let mut merged: BTreeMap<Vec<u8>, Bytes> = state
                .data
                .range(bounds.clone())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            // Overlay this transaction's own buffered writes.
            for (key, mutation) in tx.writes.range(bounds) {
                match mutation {
                    Mutation::Set(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    Mutation::Clear => {
                        merged.remove(key);
                    }
                    Mutation::Add(delta) => {
                        let base = counter_value(state.data.get(key));
                        merged.insert(key.clone(), counter_bytes(base + delta));
                    }
                }
            }

            let pairs: Vec<KeyValue> = if reverse {
                merged
                    .into_iter()
                    .rev()
                    .take(limit)
                    .map(|(k, v)| KeyValue {
                        key: Bytes::from(k),
                        value: v,
                    })
                    .collect()
            } else {
                merged
                    .into_iter()
                    .take(limit)
                    .map(|(k, v)| KeyValue {
                        key: Bytes::from(k),
                        value: v,
                    })
                    .collect()
            };
            Ok(pairs)
        })
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        self.buffer(key, Mutation::Set(Bytes::copy_from_slice(value)));
    }

    fn clear(&self, key: &[u8]) {
        self.buffer(key, Mutation::Clear);
    }

    fn clear_range(&self, range: &KeyRange) {
        let mut tx = self.inner.lock().unwrap();
        let state = self.shared.state.lock().unwrap();
        // Concurrent inserts into the range must conflict with this clear.
        tx.range_reads.push(range.clone());
        let bounds = State::range_bounds(range);
        let committed: Vec<Vec<u8>> = state.data.range(bounds.clone()).map(|(k, _)| k.clone()).collect();
        drop(state);
        let buffered: Vec<Vec<u8>> = tx.writes.range(bounds).map(|(k, _)| k.clone()).collect();
        for key in committed.into_iter().chain(buffered) {
            tx.writes.insert(key, Mutation::Clear);
        }
    }

    fn atomic_add(&self, key: &[u8], delta: i64) {
        let mut tx = self.inner.lock().unwrap();
        match tx.writes.get_mut(key) {
            Some(Mutation::Add(existing)) => *existing += delta,
            Some(Mutation::Set(value)) => {
                let new = counter_value(Some(value)) + delta;
                *value = counter_bytes(new);
            }
            Some(Mutation::Clear) => {
                tx.writes.insert(key.to_vec(), Mutation::Set(counter_bytes(delta)));
            }
            None => {
                tx.writes.insert(key.to_vec(), Mutation::Add(delta));
            }
        }
    }

    fn set_versionstamped_key(&self, key_template: &[u8], value: &[u8]) {
        let mut tx = self.inner.lock().unwrap();
        tx.stamped.push(StampedWrite::Key {
            template: key_template.to_vec(),
            value: Bytes::copy_from_slice(value),
        });
    }

    fn set_versionstamped_value(&self, key: &[u8], value_template: &[u8]) {
        let mut tx = self.inner.lock().unwrap();
        tx.stamped.push(StampedWrite::Value {
            key: key.to_vec(),
            template: value_template.to_vec(),
        });
    }

    async fn commit(&self) -> Result<Versionstamp> {
        let commit_version = {
            let mut tx = self.inner.lock().unwrap();
            if tx.committed {
                return Err(KvError::Used);
            }
            let mut state = self.shared.state.lock().unwrap();

            // Validate every read against commits after our read version.
            for key in &tx.reads {
                if state.versions.get(key).is_some_and(|&v| v > tx.read_version) {
                    return Err(KvError::Conflict);
                }
            }
            for range in &tx.range_reads {
                let bounds = State::range_bounds(range);
                if state.versions.range(bounds).any(|(_, &v)| v > tx.read_version) {
                    return Err(KvError::Conflict);
                }
            }

            // Resolve stamped templates before touching state so a malformed
            // template cannot leave a half-applied commit.
            let probe = Versionstamp::from_parts(state.commit_version + 1, 0);
            for stamped in &tx.stamped {
                let template = match stamped {
                    StampedWrite::Key { template, .. } => template,
                    StampedWrite::Value { template, .. } => template,
                };
                versionstamp::resolve_template(template, &probe)?;
            }

            state.commit_version += 1;
            let version = state.commit_version;
            let stamp = Versionstamp::from_parts(version, 0);

            for (key, mutation) in &tx.writes {
                match mutation {
                    Mutation::Set(value) => {
                        state.data.insert(key.clone(), value.clone());
                    }
                    Mutation::Clear => {
                        state.data.remove(key);
                    }
                    Mutation::Add(delta) => {
                        let new = counter_value(state.data.get(key)) + delta;
                        state.data.insert(key.clone(), counter_bytes(new));
                    }
                }
                state.versions.insert(key.clone(), version);
            }

            for stamped in &tx.stamped {
                match stamped {
                    StampedWrite::Key { template, value } => {
                        let key = versionstamp::resolve_template(template, &stamp)?;
                        state.data.insert(key.clone(), value.clone());
                        state.versions.insert(key, version);
                    }
                    StampedWrite::Value { key, template } => {
                        let value = versionstamp::resolve_template(template, &stamp)?;
                        state.data.insert(key.clone(), Bytes::from(value));
                        state.versions.insert(key.clone(), version);
                    }
                }
            }

            tx.committed = true;
            version
        };

        // Wake watchers after the locks are released.
        self.shared.commits.send_replace(commit_version);
        Ok(Versionstamp::from_parts(commit_version, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::prefix_end;

    fn range(begin: &[u8], end: &[u8]) -> KeyRange {
        KeyRange {
            begin: begin.to_vec(),
            end: end.to_vec(),
        }
    }

    #[tokio::test]
    async fn set_commit_get() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.set(b"k", b"v");
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        assert_eq!(tx.get(b"k").await.unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test]
    async fn reads_see_own_writes() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.set(b"k", b"v1");
        assert_eq!(tx.get(b"k").await.unwrap().as_deref(), Some(&b"v1"[..]));
        tx.clear(b"k");
        assert_eq!(tx.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.set(b"k", b"v");

        let other = kv.transaction().unwrap();
        assert_eq!(other.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_write_conflict_detected() {
        let kv = MemoryKv::new();
        let setup = kv.transaction().unwrap();
        setup.set(b"k", b"0");
        setup.commit().await.unwrap();

        let a = kv.transaction().unwrap();
        let b = kv.transaction().unwrap();
        a.get(b"k").await.unwrap();
        b.get(b"k").await.unwrap();
        a.set(b"k", b"a");
        b.set(b"k", b"b");

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn blind_writes_do_not_conflict() {
        let kv = MemoryKv::new();
        let a = kv.transaction().unwrap();
        let b = kv.transaction().unwrap();
        a.set(b"k", b"a");
        b.set(b"k", b"b");
        a.commit().await.unwrap();
        b.commit().await.unwrap(); // last writer wins, no read to invalidate

        let tx = kv.transaction().unwrap();
        assert_eq!(tx.get(b"k").await.unwrap().as_deref(), Some(&b"b"[..]));
    }

    #[tokio::test]
    async fn range_read_conflicts_with_insert() {
        let kv = MemoryKv::new();
        let a = kv.transaction().unwrap();
        a.get_range(&range(b"a", b"z"), usize::MAX, false).await.unwrap();

        let b = kv.transaction().unwrap();
        b.set(b"m", b"v");
        b.commit().await.unwrap();

        a.set(b"other", b"v");
        assert!(a.commit().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn atomic_adds_do_not_conflict() {
        let kv = MemoryKv::new();
        let a = kv.transaction().unwrap();
        let b = kv.transaction().unwrap();
        a.atomic_add(b"count", 1);
        b.atomic_add(b"count", 2);
        a.commit().await.unwrap();
        b.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let value = tx.get(b"count").await.unwrap().unwrap();
        assert_eq!(counter_value(Some(&value)), 3);
    }

    #[tokio::test]
    async fn atomic_add_negative_reaches_zero() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.atomic_add(b"count", 5);
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        tx.atomic_add(b"count", -5);
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let value = tx.get(b"count").await.unwrap().unwrap();
        assert_eq!(counter_value(Some(&value)), 0);
    }

    #[tokio::test]
    async fn range_scan_respects_limit_and_reverse() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            tx.set(k, b"v");
        }
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let forward = tx.get_range(&range(b"a", b"e"), 2, false).await.unwrap();
        assert_eq!(forward.len(), 2);
        assert_eq!(&forward[0].key[..], b"a");

        let backward = tx.get_range(&range(b"a", b"e"), 2, true).await.unwrap();
        assert_eq!(&backward[0].key[..], b"d");
        assert_eq!(&backward[1].key[..], b"c");
    }

    #[tokio::test]
    async fn range_scan_overlays_buffered_writes() {
        let kv = MemoryKv::new();
        let setup = kv.transaction().unwrap();
        setup.set(b"a", b"committed");
        setup.set(b"b", b"committed");
        setup.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        tx.set(b"a", b"buffered");
        tx.clear(b"b");
        tx.set(b"c", b"new");
        let pairs = tx.get_range(&range(b"a", b"z"), usize::MAX, false).await.unwrap();
        let keys: Vec<&[u8]> = pairs.iter().map(|kv| &kv.key[..]).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"c"[..]]);
        assert_eq!(&pairs[0].value[..], b"buffered");
    }

    #[tokio::test]
    async fn versionstamps_strictly_increase() {
        let kv = MemoryKv::new();
        let mut last = None;
        for i in 0..10u8 {
            let tx = kv.transaction().unwrap();
            tx.set(&[i], b"v");
            let stamp = tx.commit().await.unwrap();
            if let Some(prev) = last {
                assert!(stamp > prev);
            }
            last = Some(stamp);
        }
    }

    #[tokio::test]
    async fn versionstamped_keys_order_by_commit() {
        let kv = MemoryKv::new();
        for value in [b"first".as_slice(), b"second", b"third"] {
            let tx = kv.transaction().unwrap();
            tx.set_versionstamped_key(&versionstamp::key_template(b"log/"), value);
            tx.commit().await.unwrap();
        }

        let tx = kv.transaction().unwrap();
        let scan_range = range(b"log/", &prefix_end(b"log/"));
        let pairs = tx.get_range(&scan_range, usize::MAX, false).await.unwrap();
        let values: Vec<&[u8]> = pairs.iter().map(|kv| &kv.value[..]).collect();
        assert_eq!(values, vec![&b"first"[..], &b"second"[..], &b"third"[..]]);
    }

    #[tokio::test]
    async fn versionstamped_value_tracks_commit() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.set_versionstamped_value(b"latest", &versionstamp::value_template());
        let stamp = tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let value = tx.get(b"latest").await.unwrap().unwrap();
        assert_eq!(&value[..], &stamp.as_bytes()[..]);
    }

    #[tokio::test]
    async fn watch_resolves_on_change() {
        let kv = MemoryKv::new();
        let watcher = {
            let kv = kv.clone();
            tokio::spawn(async move { kv.watch(b"latest").await })
        };
        // Give the watcher a chance to register.
        tokio::task::yield_now().await;

        let tx = kv.transaction().unwrap();
        tx.set(b"latest", b"bumped");
        tx.commit().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), watcher)
            .await
            .expect("watch resolved")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn commit_is_single_use() {
        let kv = MemoryKv::new();
        let tx = kv.transaction().unwrap();
        tx.set(b"k", b"v");
        tx.commit().await.unwrap();
        assert!(matches!(tx.commit().await.unwrap_err(), KvError::Used));
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let kv = MemoryKv::new();
        let setup = kv.transaction().unwrap();
        setup.set(b"k", b"original");
        setup.commit().await.unwrap();

        let loser = kv.transaction().unwrap();
        loser.get(b"k").await.unwrap();
        loser.set(b"k", b"loser");
        loser.set(b"side", b"effect");

        let winner = kv.transaction().unwrap();
        winner.set(b"k", b"winner");
        winner.commit().await.unwrap();

        assert!(loser.commit().await.is_err());

        let tx = kv.transaction().unwrap();
        assert_eq!(tx.get(b"k").await.unwrap().as_deref(), Some(&b"winner"[..]));
        assert_eq!(tx.get(b"side").await.unwrap(), None);
    }
}
