//! Repository operations
//!
//! Every mutation runs inside a single serializable KV transaction:
//! re-read the actor, check the optimistic tokens, load the head commit,
//! mutate the MST, spill new blocks, sign and store a new commit, refresh
//! the actor and every secondary index, and append one firehose event. Any
//! failure aborts the transaction whole; a reader never sees a partial
//! mutation.

use crate::actor::{Actor, get_actor_tx, save_actor_tx};
use crate::blockstore::TxBlockStore;
use crate::error::{Result, StoreError};
use crate::firehose::{EVENT_VERSION, Event, EventOp, OpAction, append_event_tx};
use crate::keyspace::Keyspace;
use crate::records::{Record, bump_collection_count, delete_record_tx, save_record_tx};
use crate::store::Store;
use cid::Cid;
use heddle_kv::{Kv, Transaction, transact};
use heddle_repo::{Commit, Mst, car};
use heddle_types::{AtUri, Datetime, Nsid, RecordKey, Tid, TidClock};
use serde_bytes::ByteBuf;
use std::sync::Arc;
use tracing::Instrument;

/// Outcome of a commit-producing operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// CID of the new commit, now the actor's head
    pub commit: Cid,
    /// Revision of the new commit
    pub rev: Tid,
}

/// Outcome of a single-record write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWriteResult {
    /// CID of the stored record block
    pub cid: Cid,
    /// CID of the new commit
    pub commit: Cid,
    /// Revision of the new commit
    pub rev: Tid,
}

/// One operation in an [`Store::apply_writes`] batch
#[derive(Debug, Clone)]
pub enum RepoWrite {
    /// Create a record
    Create {
        /// The record to store
        record: Record,
    },
    /// Create-or-update a record (put semantics)
    Update {
        /// The record to store
        record: Record,
    },
    /// Delete a record
    Delete {
        /// Collection of the record
        collection: Nsid,
        /// Key of the record
        rkey: RecordKey,
    },
}

impl RepoWrite {
    /// Build a write from caller-supplied parts, e.g. a decoded applyWrites
    /// request. Unknown actions fail with `InvalidRequest`.
    pub fn from_parts(action: &str, record: Option<Record>) -> Result<Self> {
        let with_record = |action: &str, record: Option<Record>| {
            record.ok_or_else(|| {
                StoreError::InvalidRequest(format!("{action} requires a record"))
            })
        };
        match action {
            "create" => Ok(RepoWrite::Create {
                record: with_record("create", record)?,
            }),
            "update" => Ok(RepoWrite::Update {
                record: with_record("update", record)?,
            }),
            "delete" => {
                let record = with_record("delete", record)?;
                Ok(RepoWrite::Delete {
                    collection: record.collection,
                    rkey: record.rkey,
                })
            }
            other => Err(StoreError::InvalidRequest(format!(
                "unrecognized write action: {other}"
            ))),
        }
    }
}

/// Per-write outcome of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A record was created
    Created {
        /// CID of the new record block
        cid: Cid,
    },
    /// A record was replaced
    Updated {
        /// CID of the new record block
        cid: Cid,
    },
    /// A record was deleted
    Deleted,
}

/// Outcome of [`Store::apply_writes`]
#[derive(Debug, Clone)]
pub struct ApplyWritesResult {
    /// Per-write outcomes, in input order
    pub results: Vec<WriteOutcome>,
    /// CID of the single commit covering the batch
    pub commit: Cid,
    /// Revision of that commit
    pub rev: Tid,
}

fn parse_signing_key(material: &[u8]) -> Result<k256::ecdsa::SigningKey> {
    k256::ecdsa::SigningKey::from_slice(material).map_err(|e| StoreError::Crypto(Box::new(e)))
}

/// In-flight state of one mutation, valid within its transaction.
struct Mutation<T: Transaction> {
    actor: Actor,
    bs: TxBlockStore<T>,
    mst: Mst<TxBlockStore<T>>,
    prev_head: Cid,
    prev_rev: Tid,
    rev: Tid,
}

/// The common mutation preamble: transactional re-read, optimistic checks,
/// head commit load, revision derivation, armed blockstore, MST load.
async fn begin_mutation<T: Transaction>(
    tx: &T,
    keyspace: &Arc<Keyspace>,
    snapshot: &Actor,
    swap_commit: Option<&Cid>,
) -> Result<Mutation<T>> {
    use heddle_repo::BlockStore;

    let actor = get_actor_tx(tx, keyspace, &snapshot.did)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("actor {}", snapshot.did)))?;

    let head_str = actor
        .head
        .clone()
        .ok_or_else(|| StoreError::InvalidRequest("repository not initialized".into()))?;
    let head: Cid = head_str
        .parse()
        .map_err(|e| StoreError::Serialization(Box::new(e)))?;

    if let Some(swap) = swap_commit {
        if *swap != head {
            return Err(StoreError::ConcurrentModification);
        }
    }
    if actor.head != snapshot.head {
        return Err(StoreError::ConcurrentModification);
    }

    let bs = TxBlockStore::writable(tx.clone(), keyspace.clone(), actor.did.clone());
    let commit_bytes = bs
        .get(&head)
        .await?
        .ok_or_else(|| StoreError::Storage(format!("head commit missing: {head}").into()))?;
    let commit = Commit::from_cbor(&commit_bytes)?;

    let mut clock = TidClock::anchored(&commit.rev);
    let rev = clock.next();
    bs.set_rev(rev.clone());
    bs.track_writes();

    let mst = Mst::load(Arc::new(bs.clone()), commit.data, None);

    Ok(Mutation {
        actor,
        bs,
        mst,
        prev_head: head,
        prev_rev: commit.rev,
        rev,
    })
}

/// Seal a mutation: spill MST blocks, sign and store the commit, refresh the
/// actor and its indexes, append the firehose event.
async fn finish_mutation<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    mut mutation: Mutation<T>,
    ops: Vec<EventOp>,
) -> Result<CommitResult> {
    use heddle_repo::BlockStore;

    let new_root = mutation.mst.write_diff_blocks().await?;

    let signing_key = parse_signing_key(&mutation.actor.signing_key)?;
    let commit = Commit::new_unsigned(
        mutation.actor.did.clone(),
        new_root,
        mutation.rev.clone(),
        Some(mutation.prev_head),
    )
    .sign(&signing_key)?;
    let commit_cid = mutation.bs.put(&commit.to_cbor()?).await?;

    mutation.actor.head = Some(commit_cid.to_string());
    mutation.actor.rev = Some(mutation.rev.clone());
    save_actor_tx(tx, keyspace, &mutation.actor)?;

    let blocks = car::write_car_bytes(commit_cid, mutation.bs.take_log()).await?;
    let event = Event {
        version: EVENT_VERSION,
        pds_host: mutation.actor.pds_host.clone(),
        repo: mutation.actor.did.clone(),
        rev: mutation.rev.clone(),
        since: Some(mutation.prev_rev),
        commit: commit_cid,
        blocks: ByteBuf::from(blocks),
        ops,
        time: Datetime::now(),
        seq: 0,
    };
    append_event_tx(tx, keyspace, &event)?;

    Ok(CommitResult {
        commit: commit_cid,
        rev: mutation.rev,
    })
}

fn check_ownership(record: &Record, mutation: &Mutation<impl Transaction>) -> Result<()> {
    record.validate()?;
    if record.did != mutation.actor.did {
        return Err(StoreError::InvalidRecord(format!(
            "record did {} does not match actor {}",
            record.did, mutation.actor.did
        )));
    }
    Ok(())
}

/// Stage a create: store the block, insert into the MST, write the index
/// row, bump the collection counter.
async fn stage_create<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    mutation: &mut Mutation<T>,
    record: &Record,
) -> Result<(Cid, EventOp)> {
    use heddle_repo::BlockStore;

    check_ownership(record, mutation)?;
    let path = record.path();
    let cid = mutation.bs.put(&record.value).await?;
    let (mst, _) = mutation.mst.insert(&path, cid).await?;
    mutation.mst = mst;

    let mut stored = record.clone();
    stored.cid = cid.to_string();
    save_record_tx(tx, keyspace, &stored)?;
    bump_collection_count(tx, keyspace, &mutation.actor.did, record.collection.as_str(), 1);

    let op = EventOp {
        action: OpAction::Create,
        path,
        cid: Some(cid),
    };
    Ok((cid, op))
}

/// Stage a put: create-or-update, counting the collection only on create.
async fn stage_put<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    mutation: &mut Mutation<T>,
    record: &Record,
    swap_record: Option<&Cid>,
) -> Result<(Cid, bool, EventOp)> {
    use heddle_repo::BlockStore;

    check_ownership(record, mutation)?;
    let path = record.path();
    let existing = mutation.mst.get(&path).await?;

    if let Some(swap) = swap_record {
        match existing {
            None => return Err(StoreError::InvalidSwap(path.clone())),
            Some(current) if current != *swap => {
                return Err(StoreError::ConcurrentModification);
            }
            Some(_) => {}
        }
    }

    let cid = mutation.bs.put(&record.value).await?;
    let mst = if existing.is_some() {
        // Update is not an atomic tree primitive; remove then insert.
        let (mst, _) = mutation.mst.remove(&path).await?;
        let (mst, _) = mst.insert(&path, cid).await?;
        mst
    } else {
        let (mst, _) = mutation.mst.insert(&path, cid).await?;
        mst
    };
    mutation.mst = mst;

    let mut stored = record.clone();
    stored.cid = cid.to_string();
    save_record_tx(tx, keyspace, &stored)?;
    if existing.is_none() {
        bump_collection_count(tx, keyspace, &mutation.actor.did, record.collection.as_str(), 1);
    }

    let updated = existing.is_some();
    let op = EventOp {
        action: if updated {
            OpAction::Update
        } else {
            OpAction::Create
        },
        path,
        cid: Some(cid),
    };
    Ok((cid, updated, op))
}

/// Stage a delete; fails when the record is absent.
async fn stage_delete<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    mutation: &mut Mutation<T>,
    collection: &str,
    rkey: &str,
) -> Result<EventOp> {
    let path = format!("{collection}/{rkey}");
    let (mst, prior) = mutation.mst.remove(&path).await?;
    if prior.is_none() {
        return Err(StoreError::not_found(format!("record {path}")));
    }
    mutation.mst = mst;

    delete_record_tx(tx, keyspace, &mutation.actor.did, collection, rkey);
    bump_collection_count(tx, keyspace, &mutation.actor.did, collection, -1);

    Ok(EventOp {
        action: OpAction::Delete,
        path,
        cid: None,
    })
}

impl<K: Kv> Store<K> {
    /// Create an empty repository for `actor`: an empty MST root, a signed
    /// initial commit with no predecessor, and the actor's head/rev pointer.
    ///
    /// Emits no firehose event; replicas first hear of the actor on its
    /// first record mutation.
    pub async fn init_repo(&self, actor: &Actor) -> Result<CommitResult> {
        let observation = self.metrics.observe("init_repo");
        let span = tracing::info_span!("init_repo", did = %actor.did);
        let result = transact(&self.kv, self.config.retry_options(), |tx| {
            async move {
                use heddle_repo::BlockStore;

                let mut stored = get_actor_tx(&tx, &self.keyspace, &actor.did)
                    .await?
                    .ok_or_else(|| StoreError::not_found(format!("actor {}", actor.did)))?;
                if stored.head.is_some() {
                    return Err(StoreError::InvalidRequest(
                        "repository already initialized".into(),
                    ));
                }

                let mut clock = TidClock::new();
                let rev = clock.next();
                let bs =
                    TxBlockStore::writable(tx.clone(), self.keyspace.clone(), stored.did.clone());
                bs.set_rev(rev.clone());

                let mst = Mst::new(Arc::new(bs.clone()));
                let root = mst.write_diff_blocks().await?;

                let signing_key = parse_signing_key(&stored.signing_key)?;
                let commit = Commit::new_unsigned(stored.did.clone(), root, rev.clone(), None)
                    .sign(&signing_key)?;
                let commit_cid = bs.put(&commit.to_cbor()?).await?;

                stored.head = Some(commit_cid.to_string());
                stored.rev = Some(rev.clone());
                save_actor_tx(&tx, &self.keyspace, &stored)?;

                Ok(CommitResult {
                    commit: commit_cid,
                    rev,
                })
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Create a record and commit it.
    pub async fn create_record(
        &self,
        actor: &Actor,
        record: Record,
        swap_commit: Option<Cid>,
    ) -> Result<RecordWriteResult> {
        let observation = self.metrics.observe("create_record");
        let span = tracing::info_span!("create_record", did = %actor.did, path = %record.path());
        let result = transact(&self.kv, self.config.retry_options(), |tx| {
            let record = record.clone();
            async move {
                let mut mutation =
                    begin_mutation(&tx, &self.keyspace, actor, swap_commit.as_ref()).await?;
                let (cid, op) = stage_create(&tx, &self.keyspace, &mut mutation, &record).await?;
                let sealed = finish_mutation(&tx, &self.keyspace, mutation, vec![op]).await?;
                Ok(RecordWriteResult {
                    cid,
                    commit: sealed.commit,
                    rev: sealed.rev,
                })
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Create-or-update a record, with an optional per-record optimistic
    /// token. `swap_record` must name the current record CID; providing it
    /// for an absent record fails with `InvalidSwap`.
    pub async fn put_record(
        &self,
        actor: &Actor,
        record: Record,
        swap_record: Option<Cid>,
        swap_commit: Option<Cid>,
    ) -> Result<RecordWriteResult> {
        let observation = self.metrics.observe("put_record");
        let span = tracing::info_span!("put_record", did = %actor.did, path = %record.path());
        let result = transact(&self.kv, self.config.retry_options(), |tx| {
            let record = record.clone();
            async move {
                let mut mutation =
                    begin_mutation(&tx, &self.keyspace, actor, swap_commit.as_ref()).await?;
                let (cid, _, op) = stage_put(
                    &tx,
                    &self.keyspace,
                    &mut mutation,
                    &record,
                    swap_record.as_ref(),
                )
                .await?;
                let sealed = finish_mutation(&tx, &self.keyspace, mutation, vec![op]).await?;
                Ok(RecordWriteResult {
                    cid,
                    commit: sealed.commit,
                    rev: sealed.rev,
                })
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Delete the record named by `uri` and commit.
    pub async fn delete_record(
        &self,
        actor: &Actor,
        uri: &AtUri,
        swap_commit: Option<Cid>,
    ) -> Result<CommitResult> {
        if uri.repo() != actor.did.as_str() {
            return Err(StoreError::InvalidUri(format!(
                "uri repo {} does not match actor {}",
                uri.repo(),
                actor.did
            )));
        }
        let observation = self.metrics.observe("delete_record");
        let span = tracing::info_span!("delete_record", did = %actor.did, path = %uri.path());
        let result = transact(&self.kv, self.config.retry_options(), |tx| {
            async move {
                let mut mutation =
                    begin_mutation(&tx, &self.keyspace, actor, swap_commit.as_ref()).await?;
                let op = stage_delete(
                    &tx,
                    &self.keyspace,
                    &mut mutation,
                    uri.collection(),
                    uri.rkey(),
                )
                .await?;
                finish_mutation(&tx, &self.keyspace, mutation, vec![op]).await
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Apply a batch of writes as one atomic commit with one firehose event.
    /// Any failing write aborts the whole batch.
    pub async fn apply_writes(
        &self,
        actor: &Actor,
        writes: Vec<RepoWrite>,
        swap_commit: Option<Cid>,
    ) -> Result<ApplyWritesResult> {
        if writes.is_empty() {
            return Err(StoreError::InvalidRequest("empty write batch".into()));
        }
        let observation = self.metrics.observe("apply_writes");
        let span = tracing::info_span!("apply_writes", did = %actor.did, writes = writes.len());
        let result = transact(&self.kv, self.config.retry_options(), |tx| {
            let writes = writes.clone();
            async move {
                let mut mutation =
                    begin_mutation(&tx, &self.keyspace, actor, swap_commit.as_ref()).await?;

                let mut results = Vec::with_capacity(writes.len());
                let mut ops = Vec::with_capacity(writes.len());
                for write in &writes {
                    match write {
                        RepoWrite::Create { record } => {
                            let (cid, op) =
                                stage_create(&tx, &self.keyspace, &mut mutation, record).await?;
                            results.push(WriteOutcome::Created { cid });
                            ops.push(op);
                        }
                        RepoWrite::Update { record } => {
                            let (cid, updated, op) =
                                stage_put(&tx, &self.keyspace, &mut mutation, record, None)
                                    .await?;
                            results.push(if updated {
                                WriteOutcome::Updated { cid }
                            } else {
                                WriteOutcome::Created { cid }
                            });
                            ops.push(op);
                        }
                        RepoWrite::Delete { collection, rkey } => {
                            let op = stage_delete(
                                &tx,
                                &self.keyspace,
                                &mut mutation,
                                collection.as_str(),
                                rkey.as_str(),
                            )
                            .await?;
                            results.push(WriteOutcome::Deleted);
                            ops.push(op);
                        }
                    }
                }

                let sealed = finish_mutation(&tx, &self.keyspace, mutation, ops).await?;
                Ok(ApplyWritesResult {
                    results,
                    commit: sealed.commit,
                    rev: sealed.rev,
                })
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }
}
