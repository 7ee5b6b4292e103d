//! The engine handle
//!
//! A [`Store`] owns a KV client handle, the registered keyspace, the
//! configuration, and the metrics handles. It is cheap to clone and safe to
//! share; every operation opens its own transaction.

use crate::actor::{Actor, get_actor_tx, resolve_indexed_actor, save_actor_tx};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::firehose::{EventPage, blocks_since_tx, events_since_tx};
use crate::keyspace::Keyspace;
use crate::observe::Metrics;
use crate::records::{Record, RecordPage, get_collections_tx, list_records_tx};
use crate::tid::allocate_tid;
use bytes::Bytes;
use cid::Cid;
use heddle_kv::tuple::Element;
use heddle_kv::{Kv, MemoryKv, Transaction, Versionstamp, read_only, transact};
use heddle_types::{AtUri, Did, Handle, Nsid, Tid};
use std::sync::Arc;
use tracing::Instrument;

/// A page of actors plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct ActorPage {
    /// Actors in DID order
    pub actors: Vec<Actor>,
    /// DID of the last returned actor, when a further page exists
    pub next_cursor: Option<String>,
}

/// The repository storage engine
#[derive(Clone)]
pub struct Store<K: Kv> {
    pub(crate) kv: K,
    pub(crate) keyspace: Arc<Keyspace>,
    pub(crate) config: Config,
    pub(crate) metrics: Arc<Metrics>,
}

impl<K: Kv> Store<K> {
    /// Bind the engine to a KV client. Metrics are registered against the
    /// supplied registry; no global state is touched.
    pub fn open(kv: K, config: Config, registry: &prometheus::Registry) -> Result<Self> {
        let metrics = Metrics::new(registry).map_err(|e| StoreError::Storage(Box::new(e)))?;
        Ok(Self {
            kv,
            keyspace: Arc::new(Keyspace::new()),
            config,
            metrics: Arc::new(metrics),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate and persist an actor, refreshing its secondary indexes.
    ///
    /// Index entries under a previous handle or email are left in place and
    /// keep resolving to this actor; handle uniqueness is the caller's
    /// responsibility.
    pub async fn save_actor(&self, actor: &Actor) -> Result<()> {
        actor.validate()?;
        let observation = self.metrics.observe("save_actor");
        let span = tracing::info_span!("save_actor", did = %actor.did);
        let result = transact(&self.kv, self.config.retry_options(), |tx| async move {
            save_actor_tx(&tx, &self.keyspace, actor)
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Fetch an actor by DID.
    pub async fn get_actor(&self, did: &Did) -> Result<Actor> {
        let observation = self.metrics.observe("get_actor");
        let span = tracing::info_span!("get_actor", did = %did);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            get_actor_tx(&tx, &self.keyspace, did)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("actor {did}")))
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Fetch an actor by handle.
    pub async fn get_actor_by_handle(&self, handle: &Handle) -> Result<Actor> {
        let observation = self.metrics.observe("get_actor_by_handle");
        let span = tracing::info_span!("get_actor_by_handle", handle = %handle);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            let key = self.keyspace.handle_key(handle.as_str());
            resolve_indexed_actor(&tx, &self.keyspace, &key, &format!("handle {handle}")).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Fetch an actor by email within a host.
    pub async fn get_actor_by_email(&self, host: &str, email: &str) -> Result<Actor> {
        let observation = self.metrics.observe("get_actor_by_email");
        let span = tracing::info_span!("get_actor_by_email", host, email);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            let key = self.keyspace.email_key(host, email);
            resolve_indexed_actor(&tx, &self.keyspace, &key, &format!("email {email}@{host}"))
                .await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Enumerate a host's actors in DID order, starting strictly after
    /// `cursor` when given.
    pub async fn list_actors(
        &self,
        host: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ActorPage> {
        let observation = self.metrics.observe("list_actors");
        let span = tracing::info_span!("list_actors", host, limit);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            let mut range = self.keyspace.dids_by_host.range_of(&[Element::Str(host)]);
            if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
                let cursor_key = self
                    .keyspace
                    .dids_by_host
                    .pack(&[Element::Str(host), Element::Str(cursor)]);
                range = range.after(&cursor_key);
            }

            let rows = tx
                .get_range(&range, limit.saturating_add(1), false)
                .await?;
            let has_more = rows.len() > limit;

            let mut actors = Vec::with_capacity(rows.len().min(limit));
            for row in rows.into_iter().take(limit) {
                let elements = self
                    .keyspace
                    .dids_by_host
                    .unpack(&row.key)
                    .ok_or_else(|| {
                        StoreError::Serialization("host index key outside subspace".into())
                    })??;
                let did_str = elements.get(1).and_then(|e| e.as_str()).ok_or_else(|| {
                    StoreError::Serialization("malformed host index key".into())
                })?;
                let did =
                    Did::new(did_str).map_err(|e| StoreError::Serialization(Box::new(e)))?;
                let actor = get_actor_tx(&tx, &self.keyspace, &did)
                    .await?
                    .ok_or_else(|| StoreError::not_found(format!("actor {did}")))?;
                actors.push(actor);
            }

            let next_cursor = if has_more {
                actors.last().map(|a| a.did.as_str().to_string())
            } else {
                None
            };
            Ok(ActorPage {
                actors,
                next_cursor,
            })
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Fetch a record by URI from the secondary index.
    pub async fn get_record(&self, uri: &AtUri) -> Result<Record> {
        let observation = self.metrics.observe("get_record");
        let span = tracing::info_span!("get_record", uri = %uri);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            let key = self
                .keyspace
                .record_key(uri.repo(), uri.collection(), uri.rkey());
            match tx.get(&key).await? {
                Some(bytes) => Record::decode(&bytes),
                None => Err(StoreError::not_found(format!("record {uri}"))),
            }
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// List a collection's records in rkey order (descending when
    /// `reverse`), with limit+1 pagination.
    pub async fn list_records(
        &self,
        did: &Did,
        collection: &Nsid,
        limit: usize,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<RecordPage> {
        let observation = self.metrics.observe("list_records");
        let span = tracing::info_span!("list_records", did = %did, collection = %collection);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            list_records_tx(&tx, &self.keyspace, did, collection, limit, cursor, reverse).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Collections of `did` holding at least one record, in key order.
    pub async fn get_collections(&self, did: &Did) -> Result<Vec<Nsid>> {
        let observation = self.metrics.observe("get_collections");
        let span = tracing::info_span!("get_collections", did = %did);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            get_collections_tx(&tx, &self.keyspace, did).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Replay firehose events strictly after `cursor` (empty = from the
    /// beginning), up to `limit`.
    pub async fn get_events_since(&self, cursor: &[u8], limit: usize) -> Result<EventPage> {
        let observation = self.metrics.observe("get_events_since");
        let span = tracing::info_span!("get_events_since", limit);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            events_since_tx(&tx, &self.keyspace, cursor, limit).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Replay firehose events from a sequence number.
    pub async fn get_events_since_seq(&self, seq: i64, limit: usize) -> Result<EventPage> {
        let cursor = Versionstamp::seq_cursor(seq);
        self.get_events_since(&cursor, limit).await
    }

    /// Resolve when the firehose advances past its state at call time.
    pub async fn watch_latest_seq(&self) -> Result<()> {
        self.kv
            .watch(&self.keyspace.latest_seq_key())
            .await
            .map_err(StoreError::from)
    }

    /// Blocks stored for `did` under revisions strictly after `rev`,
    /// skipping blocks that were deleted after being indexed.
    pub async fn get_blocks_since(&self, did: &Did, rev: &Tid) -> Result<Vec<(Cid, Bytes)>> {
        let observation = self.metrics.observe("get_blocks_since");
        let span = tracing::info_span!("get_blocks_since", did = %did, rev = %rev);
        let result = read_only(&self.kv, self.config.retry_options(), |tx| async move {
            blocks_since_tx(&tx, &self.keyspace, did, rev).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }

    /// Allocate the next TID for `did`: globally unique and strictly
    /// increasing per actor, coordinated through one KV row.
    pub async fn next_tid(&self, did: &Did) -> Result<Tid> {
        let observation = self.metrics.observe("next_tid");
        let span = tracing::info_span!("next_tid", did = %did);
        let result = transact(&self.kv, self.config.retry_options(), |tx| async move {
            allocate_tid(&tx, &self.keyspace, did).await
        })
        .instrument(span)
        .await;
        observation.finish(&result);
        result
    }
}

impl Store<MemoryKv> {
    /// An engine over a fresh in-memory KV, for tests and embedding.
    pub fn open_memory(config: Config) -> Self {
        Self::open(MemoryKv::new(), config, &prometheus::Registry::new())
            .expect("fresh registry accepts registration")
    }
}
