//! Block storage abstraction
//!
//! CID-keyed block storage for MST nodes, commits, and record payloads. The
//! storage engine implements [`BlockStore`] over a per-actor, per-transaction
//! slice of its KV backend; [`MemoryBlockStore`] is the in-memory stand-in
//! for tests.

use crate::error::{RepoError, Result};
use crate::{DAG_CBOR, SHA2_256};
use bytes::Bytes;
use cid::Cid;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Compute the CID of a DAG-CBOR block: CIDv1, SHA2-256 multihash.
///
/// The same bytes always yield the same CID; different bytes differ.
pub fn compute_cid(data: &[u8]) -> Result<Cid> {
    let digest = Sha256::digest(data);
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, &digest)
        .map_err(|e| RepoError::InvalidMst(e.to_string()))?;
    Ok(Cid::new_v1(DAG_CBOR, mh))
}

/// Async CID-addressed block storage
///
/// `Clone` is required so the MST can share a storage handle across tree
/// nodes. Mutating methods are only honored by writable bindings; read-only
/// bindings fail them with [`RepoError::RequiresTransaction`].
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID. `None` when absent.
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>>;

    /// Size in bytes of a stored block. `None` when absent.
    async fn get_size(&self, cid: &Cid) -> Result<Option<usize>>;

    /// Whether a block exists, without retrieving it.
    async fn has(&self, cid: &Cid) -> Result<bool>;

    /// Store a block, returning its computed CID.
    async fn put(&self, data: &[u8]) -> Result<Cid>;

    /// Store many pre-addressed blocks at once.
    async fn put_many(&self, blocks: impl IntoIterator<Item = (Cid, Bytes)> + Send) -> Result<()>;

    /// Delete a block. Deleting an absent block is not an error.
    async fn delete(&self, cid: &Cid) -> Result<()>;
}

/// In-memory block storage over a `BTreeMap`
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<Cid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks stored.
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().unwrap().get(cid).cloned())
    }

    async fn get_size(&self, cid: &Cid) -> Result<Option<usize>> {
        Ok(self.blocks.read().unwrap().get(cid).map(|b| b.len()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().unwrap().contains_key(cid))
    }

    async fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = compute_cid(data)?;
        self.blocks
            .write()
            .unwrap()
            .insert(cid, Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn put_many(&self, blocks: impl IntoIterator<Item = (Cid, Bytes)> + Send) -> Result<()> {
        let mut store = self.blocks.write().unwrap();
        for (cid, data) in blocks {
            store.insert(cid, data);
        }
        Ok(())
    }

    async fn delete(&self, cid: &Cid) -> Result<()> {
        self.blocks.write().unwrap().remove(cid);
        Ok(())
    }
}
