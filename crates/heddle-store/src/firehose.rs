//! Firehose event log
//!
//! Every committed repo mutation appends exactly one event, keyed by the
//! versionstamp the KV assigns at commit time. Committed events are therefore
//! totally ordered by true serialization order, globally across actors and
//! hosts. A watchable `latest_seq` row is bumped in the same transaction so
//! streaming frontends can block instead of polling.

use crate::error::{Result, StoreError};
use crate::keyspace::Keyspace;
use bytes::Bytes;
use cid::Cid;
use heddle_kv::tuple::Element;
use heddle_kv::{Transaction, Versionstamp, versionstamp};
use heddle_types::{Datetime, Did, Tid};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Serialization version written into new events.
pub(crate) const EVENT_VERSION: u32 = 1;

/// Action of a single repo operation within an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    /// A record was created
    Create,
    /// A record was replaced
    Update,
    /// A record was deleted
    Delete,
}

/// One record mutation within an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOp {
    /// What happened
    pub action: OpAction,
    /// Record path `"<collection>/<rkey>"`
    pub path: String,
    /// New record CID for creates and updates; `None` for deletes
    pub cid: Option<Cid>,
}

/// One committed repo mutation
///
/// Stored without `seq`; readers fill it from the first 8 bytes of the
/// versionstamp key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Serialization version
    pub version: u32,
    /// PDS host of the mutated actor
    pub pds_host: String,
    /// The mutated actor
    pub repo: Did,
    /// Revision of the new commit
    pub rev: Tid,
    /// Revision of the previous commit
    pub since: Option<Tid>,
    /// CID of the new commit
    pub commit: Cid,
    /// CAR bytes: the new commit block plus every block written by the
    /// mutation, in write order
    pub blocks: ByteBuf,
    /// Ordered record operations
    pub ops: Vec<EventOp>,
    /// Wall-clock time of the mutation
    pub time: Datetime,
    /// Sequence number derived from the versionstamp; filled on read
    #[serde(skip)]
    pub seq: i64,
}

impl Event {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| StoreError::Serialization(Box::new(e)))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| StoreError::Serialization(Box::new(e)))
    }
}

/// Stage the three versionstamped writes for one event.
pub(crate) fn append_event_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    event: &Event,
) -> Result<()> {
    let bytes = event.encode()?;
    tx.set_versionstamped_key(
        &versionstamp::key_template(keyspace.events.prefix()),
        &bytes,
    );
    let host_prefix = keyspace
        .events_by_host
        .pack(&[Element::Str(&event.pds_host)]);
    tx.set_versionstamped_key(&versionstamp::key_template(&host_prefix), b"");
    tx.set_versionstamped_value(&keyspace.latest_seq_key(), &versionstamp::value_template());
    Ok(())
}

/// A page of events plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct EventPage {
    /// Events in commit order, `seq` filled
    pub events: Vec<Event>,
    /// Versionstamp of the last returned event
    pub next_cursor: Option<Vec<u8>>,
}

/// Scan events strictly after `cursor` (empty = from the beginning).
pub(crate) async fn events_since_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    cursor: &[u8],
    limit: usize,
) -> Result<EventPage> {
    let mut range = keyspace.events.range();
    if !cursor.is_empty() {
        let mut cursor_key = keyspace.events.prefix().to_vec();
        cursor_key.extend_from_slice(cursor);
        range = range.after(&cursor_key);
    }

    let rows = tx.get_range(&range, limit, false).await?;
    let mut events = Vec::with_capacity(rows.len());
    let mut next_cursor = None;
    for row in rows {
        let stamp_bytes = &row.key[keyspace.events.prefix().len()..];
        let stamp = Versionstamp::from_slice(stamp_bytes)?;
        let mut event = Event::decode(&row.value)?;
        event.seq = stamp.seq();
        next_cursor = Some(stamp_bytes.to_vec());
        events.push(event);
    }
    Ok(EventPage {
        events,
        next_cursor,
    })
}

/// Blocks newly indexed after `rev` for one actor, skipping any whose
/// primary block has since been deleted.
pub(crate) async fn blocks_since_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
    rev: &Tid,
) -> Result<Vec<(Cid, Bytes)>> {
    use heddle_kv::NO_LIMIT;
    use heddle_kv::tuple::prefix_end;

    let mut range = keyspace.blocks_by_rev.range_of(&[Element::Str(did.as_str())]);
    // Everything strictly after the given rev.
    range.begin = prefix_end(
        &keyspace
            .blocks_by_rev
            .pack(&[Element::Str(did.as_str()), Element::Str(rev.as_str())]),
    );

    let rows = tx.get_range(&range, NO_LIMIT, false).await?;
    let mut blocks = Vec::new();
    for row in rows {
        let elements = keyspace
            .blocks_by_rev
            .unpack(&row.key)
            .ok_or_else(|| StoreError::Serialization("rev index key outside subspace".into()))??;
        let cid_bytes = elements
            .get(2)
            .and_then(|e| e.as_bytes())
            .ok_or_else(|| StoreError::Serialization("malformed rev index key".into()))?;
        let cid = Cid::try_from(cid_bytes)
            .map_err(|e| StoreError::Serialization(Box::new(e)))?;
        // The index tolerates entries whose block was deleted afterwards;
        // those are skipped, not reported.
        if let Some(data) = tx.get(&keyspace.block_key(did, &cid)).await? {
            blocks.push((cid, data));
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heddle_kv::{Kv, MemoryKv};
    use heddle_repo::compute_cid;

    fn test_event(host: &str, rev: &str, n: u8) -> Event {
        Event {
            version: EVENT_VERSION,
            pds_host: host.into(),
            repo: Did::raw("did:plc:a1"),
            rev: Tid::raw(rev),
            since: None,
            commit: compute_cid(&[n]).unwrap(),
            blocks: ByteBuf::from(vec![n; 4]),
            ops: vec![EventOp {
                action: OpAction::Create,
                path: "app.test.post/3jqf".into(),
                cid: Some(compute_cid(&[n, n]).unwrap()),
            }],
            time: Datetime::now(),
            seq: 0,
        }
    }

    #[test]
    fn encode_skips_seq() {
        let mut event = test_event("h1", "3jzfcijpj2z2a", 1);
        event.seq = 42;
        let decoded = Event::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.seq, 0); // not serialized
        assert_eq!(decoded.rev, event.rev);
        assert_eq!(decoded.ops, event.ops);
    }

    #[tokio::test]
    async fn events_replay_in_commit_order_with_seq() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();

        for (i, rev) in ["3jzfcijpj2z2a", "3jzfcijpj2z2b", "3jzfcijpj2z2c"]
            .iter()
            .enumerate()
        {
            let tx = kv.transaction().unwrap();
            append_event_tx(&tx, &ks, &test_event("h1", rev, i as u8)).unwrap();
            tx.commit().await.unwrap();
        }

        let tx = kv.transaction().unwrap();
        let page = events_since_tx(&tx, &ks, &[], 10).await.unwrap();
        assert_eq!(page.events.len(), 3);
        let revs: Vec<&str> = page.events.iter().map(|e| e.rev.as_str()).collect();
        assert_eq!(revs, vec!["3jzfcijpj2z2a", "3jzfcijpj2z2b", "3jzfcijpj2z2c"]);
        // Sequence numbers are filled and strictly increasing.
        assert!(page.events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn cursor_resumes_after_last_seen() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();

        for rev in ["3jzfcijpj2z2a", "3jzfcijpj2z2b", "3jzfcijpj2z2c"] {
            let tx = kv.transaction().unwrap();
            append_event_tx(&tx, &ks, &test_event("h1", rev, 0)).unwrap();
            tx.commit().await.unwrap();
        }

        let tx = kv.transaction().unwrap();
        let first = events_since_tx(&tx, &ks, &[], 2).await.unwrap();
        assert_eq!(first.events.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let rest = events_since_tx(&tx, &ks, &cursor, 10).await.unwrap();
        assert_eq!(rest.events.len(), 1);
        assert_eq!(rest.events[0].rev.as_str(), "3jzfcijpj2z2c");
        // Past the end: empty page, no cursor.
        let empty = events_since_tx(&tx, &ks, &rest.next_cursor.unwrap(), 10)
            .await
            .unwrap();
        assert!(empty.events.is_empty());
        assert!(empty.next_cursor.is_none());
    }

    #[tokio::test]
    async fn latest_seq_row_tracks_commits() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();

        let tx = kv.transaction().unwrap();
        append_event_tx(&tx, &ks, &test_event("h1", "3jzfcijpj2z2a", 0)).unwrap();
        let stamp = tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let row = tx.get(&ks.latest_seq_key()).await.unwrap().unwrap();
        assert_eq!(&row[..], &stamp.as_bytes()[..]);
    }
}
