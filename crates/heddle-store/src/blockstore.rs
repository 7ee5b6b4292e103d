//! Per-actor, per-transaction block storage
//!
//! A [`TxBlockStore`] binds one actor DID to one KV transaction handle and
//! exposes the [`BlockStore`] surface the MST and commit machinery consume.
//! Keys are scoped by DID, so no binding can observe another actor's blocks
//! even inside the same transaction.
//!
//! A writable binding can be armed with the mutation's revision, after which
//! every put also writes the incremental-sync index entry
//! `blocks_by_rev (did, rev, cid)`. The binding also keeps an ordered
//! in-transaction write log which the repository operation drains into the
//! firehose CAR payload. Read-only bindings refuse every mutation.

use crate::keyspace::Keyspace;
use bytes::Bytes;
use cid::Cid;
use heddle_repo::{BlockStore, RepoError, compute_cid};
use heddle_kv::Transaction;
use heddle_types::{Did, Tid};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct WriteLog {
    tracking: bool,
    blocks: Vec<(Cid, Bytes)>,
}

/// Transaction-scoped block store for one actor
#[derive(Debug, Clone)]
pub struct TxBlockStore<T> {
    tx: T,
    keyspace: Arc<Keyspace>,
    did: Did,
    writable: bool,
    rev: Arc<Mutex<Option<Tid>>>,
    log: Arc<Mutex<WriteLog>>,
}

impl<T: Transaction> TxBlockStore<T> {
    /// A binding that refuses mutations.
    pub fn read_only(tx: T, keyspace: Arc<Keyspace>, did: Did) -> Self {
        Self::bind(tx, keyspace, did, false)
    }

    /// A binding that accepts mutations.
    pub fn writable(tx: T, keyspace: Arc<Keyspace>, did: Did) -> Self {
        Self::bind(tx, keyspace, did, true)
    }

    fn bind(tx: T, keyspace: Arc<Keyspace>, did: Did, writable: bool) -> Self {
        Self {
            tx,
            keyspace,
            did,
            writable,
            rev: Arc::new(Mutex::new(None)),
            log: Arc::new(Mutex::new(WriteLog::default())),
        }
    }

    /// Arm the incremental-sync index: subsequent puts also index the block
    /// under `(did, rev, cid)`.
    pub fn set_rev(&self, rev: Tid) {
        *self.rev.lock().unwrap() = Some(rev);
    }

    /// Start logging every written block, in write order.
    pub fn track_writes(&self) {
        self.log.lock().unwrap().tracking = true;
    }

    /// Drain the write log.
    pub fn take_log(&self) -> Vec<(Cid, Bytes)> {
        let mut log = self.log.lock().unwrap();
        std::mem::take(&mut log.blocks)
    }

    fn store_block(&self, cid: Cid, data: Bytes) -> Result<(), RepoError> {
        if !self.writable {
            return Err(RepoError::RequiresTransaction);
        }
        self.tx.set(&self.keyspace.block_key(&self.did, &cid), &data);
        if let Some(rev) = self.rev.lock().unwrap().as_ref() {
            self.tx
                .set(&self.keyspace.block_rev_key(&self.did, rev, &cid), b"");
        }
        let mut log = self.log.lock().unwrap();
        if log.tracking {
            log.blocks.push((cid, data));
        }
        Ok(())
    }
}

impl<T: Transaction> BlockStore for TxBlockStore<T> {
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>, RepoError> {
        self.tx
            .get(&self.keyspace.block_key(&self.did, cid))
            .await
            .map_err(RepoError::storage)
    }

    async fn get_size(&self, cid: &Cid) -> Result<Option<usize>, RepoError> {
        Ok(self.get(cid).await?.map(|b| b.len()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, RepoError> {
        Ok(self.get(cid).await?.is_some())
    }

    async fn put(&self, data: &[u8]) -> Result<Cid, RepoError> {
        let cid = compute_cid(data)?;
        self.store_block(cid, Bytes::copy_from_slice(data))?;
        Ok(cid)
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (Cid, Bytes)> + Send,
    ) -> Result<(), RepoError> {
        for (cid, data) in blocks {
            self.store_block(cid, data)?;
        }
        Ok(())
    }

    async fn delete(&self, cid: &Cid) -> Result<(), RepoError> {
        if !self.writable {
            return Err(RepoError::RequiresTransaction);
        }
        self.tx.clear(&self.keyspace.block_key(&self.did, cid));
        Ok(())
    }
}
