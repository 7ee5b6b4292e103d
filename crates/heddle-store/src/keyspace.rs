//! Keyspace layout
//!
//! Every logical index lives in a disjoint, statically registered directory.
//! Keys are tuple-packed so range scans enumerate in component order:
//! collections in key order, records in rkey order, events in versionstamp
//! (commit) order.

use cid::Cid;
use heddle_kv::Subspace;
use heddle_kv::tuple::Element;
use heddle_types::{Did, Tid};

/// The engine's directories
///
/// | Directory | Key tuple | Value |
/// |---|---|---|
/// | `actors` | `(did)` | DAG-CBOR actor |
/// | `dids_by_handle` | `(handle)` | did bytes |
/// | `dids_by_email` | `(host, email)` | did bytes |
/// | `dids_by_host` | `(host, did)` | empty |
/// | `tids_by_did` | `(did)` | last TID, 8-byte big-endian |
/// | `records` | `(did, collection, rkey)` | DAG-CBOR record |
/// | `collection_counts` | `(did, collection)` | i64 counter, little-endian |
/// | `blocks` | `(did, cid_bytes)` | raw block |
/// | `blocks_by_rev` | `(did, rev, cid_bytes)` | empty |
/// | `events` | `(versionstamp)` | DAG-CBOR event, seq omitted |
/// | `events_by_host` | `(host, versionstamp)` | empty |
/// | `latest_seq` | `("latest")` | versionstamp bytes |
#[derive(Debug, Clone)]
pub struct Keyspace {
    /// Primary actor rows
    pub actors: Subspace,
    /// Handle → DID secondary index
    pub dids_by_handle: Subspace,
    /// (host, email) → DID secondary index
    pub dids_by_email: Subspace,
    /// Per-host actor enumeration index
    pub dids_by_host: Subspace,
    /// Per-actor TID allocator rows
    pub tids_by_did: Subspace,
    /// Record secondary index
    pub records: Subspace,
    /// Per-collection record counters
    pub collection_counts: Subspace,
    /// Per-actor content-addressed blocks
    pub blocks: Subspace,
    /// Incremental-sync index over blocks
    pub blocks_by_rev: Subspace,
    /// Global firehose log
    pub events: Subspace,
    /// Per-host firehose index
    pub events_by_host: Subspace,
    /// Watchable latest-sequence row
    pub latest_seq: Subspace,
}

impl Keyspace {
    /// Register every directory.
    pub fn new() -> Self {
        Self {
            actors: Subspace::new("actors"),
            dids_by_handle: Subspace::new("dids_by_handle"),
            dids_by_email: Subspace::new("dids_by_email"),
            dids_by_host: Subspace::new("dids_by_host"),
            tids_by_did: Subspace::new("tids_by_did"),
            records: Subspace::new("records"),
            collection_counts: Subspace::new("collection_counts"),
            blocks: Subspace::new("blocks"),
            blocks_by_rev: Subspace::new("blocks_by_rev"),
            events: Subspace::new("events"),
            events_by_host: Subspace::new("events_by_host"),
            latest_seq: Subspace::new("latest_seq"),
        }
    }

    pub(crate) fn actor_key(&self, did: &Did) -> Vec<u8> {
        self.actors.pack(&[Element::Str(did.as_str())])
    }

    pub(crate) fn handle_key(&self, handle: &str) -> Vec<u8> {
        self.dids_by_handle.pack(&[Element::Str(handle)])
    }

    pub(crate) fn email_key(&self, host: &str, email: &str) -> Vec<u8> {
        self.dids_by_email
            .pack(&[Element::Str(host), Element::Str(email)])
    }

    pub(crate) fn host_key(&self, host: &str, did: &Did) -> Vec<u8> {
        self.dids_by_host
            .pack(&[Element::Str(host), Element::Str(did.as_str())])
    }

    pub(crate) fn tid_key(&self, did: &Did) -> Vec<u8> {
        self.tids_by_did.pack(&[Element::Str(did.as_str())])
    }

    pub(crate) fn record_key(&self, did: &str, collection: &str, rkey: &str) -> Vec<u8> {
        self.records.pack(&[
            Element::Str(did),
            Element::Str(collection),
            Element::Str(rkey),
        ])
    }

    pub(crate) fn collection_count_key(&self, did: &Did, collection: &str) -> Vec<u8> {
        self.collection_counts
            .pack(&[Element::Str(did.as_str()), Element::Str(collection)])
    }

    pub(crate) fn block_key(&self, did: &Did, cid: &Cid) -> Vec<u8> {
        self.blocks
            .pack(&[Element::Str(did.as_str()), Element::Bytes(&cid.to_bytes())])
    }

    pub(crate) fn block_rev_key(&self, did: &Did, rev: &Tid, cid: &Cid) -> Vec<u8> {
        self.blocks_by_rev.pack(&[
            Element::Str(did.as_str()),
            Element::Str(rev.as_str()),
            Element::Bytes(&cid.to_bytes()),
        ])
    }

    pub(crate) fn latest_seq_key(&self) -> Vec<u8> {
        self.latest_seq.pack(&[Element::Str("latest")])
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}
