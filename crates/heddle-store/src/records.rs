//! Record rows, collection counters

use crate::error::{Result, StoreError};
use crate::keyspace::Keyspace;
use heddle_kv::Transaction;
use heddle_types::{Datetime, Did, Nsid, RecordKey};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Serialization version written into new record rows.
pub(crate) const RECORD_VERSION: u32 = 1;

/// One record, as stored in the secondary index
///
/// The canonical copy of the payload is the block at `(did, cid)`; the index
/// row repeats it so listings never traverse the MST. The `cid` field is
/// filled by the engine when the record block is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Serialization version
    pub version: u32,
    /// Owning actor
    pub did: Did,
    /// Collection NSID
    pub collection: Nsid,
    /// Record key within the collection
    pub rkey: RecordKey,
    /// CID of the record block, as a string; filled by the engine
    pub cid: String,
    /// DAG-CBOR payload bytes
    pub value: ByteBuf,
    /// Creation time
    pub created_at: Datetime,
}

impl Record {
    /// Build a record awaiting storage; the engine fills `cid`.
    pub fn new(did: Did, collection: Nsid, rkey: RecordKey, value: Vec<u8>) -> Self {
        Self {
            version: RECORD_VERSION,
            did,
            collection,
            rkey,
            cid: String::new(),
            value: ByteBuf::from(value),
            created_at: Datetime::now(),
        }
    }

    /// The MST path of this record.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.rkey)
    }

    /// Check required fields. DID, collection, and rkey are enforced by
    /// their types; the payload must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.value.is_empty() {
            return Err(StoreError::InvalidRecord("empty value".into()));
        }
        Ok(())
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| StoreError::Serialization(Box::new(e)))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| StoreError::Serialization(Box::new(e)))
    }
}

/// Write (or overwrite) a record's index row.
pub(crate) fn save_record_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    record: &Record,
) -> Result<()> {
    let key = keyspace.record_key(
        record.did.as_str(),
        record.collection.as_str(),
        record.rkey.as_str(),
    );
    tx.set(&key, &record.encode()?);
    Ok(())
}

/// Clear a record's index row.
pub(crate) fn delete_record_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
    collection: &str,
    rkey: &str,
) {
    tx.clear(&keyspace.record_key(did.as_str(), collection, rkey));
}

/// Bump a collection counter by `delta` (atomic add, no read conflict).
pub(crate) fn bump_collection_count<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
    collection: &str,
    delta: i64,
) {
    tx.atomic_add(&keyspace.collection_count_key(did, collection), delta);
}

/// A page of records plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct RecordPage {
    /// Records in rkey order (descending when listed in reverse)
    pub records: Vec<Record>,
    /// rkey of the last returned record, when a further page exists
    pub next_cursor: Option<String>,
}

/// Scan a collection with limit+1 pagination.
pub(crate) async fn list_records_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
    collection: &Nsid,
    limit: usize,
    cursor: Option<&str>,
    reverse: bool,
) -> Result<RecordPage> {
    use heddle_kv::tuple::Element;

    let mut range = keyspace.records.range_of(&[
        Element::Str(did.as_str()),
        Element::Str(collection.as_str()),
    ]);
    if let Some(cursor) = cursor {
        let cursor_key = keyspace.record_key(did.as_str(), collection.as_str(), cursor);
        if reverse {
            range = range.before(&cursor_key);
        } else {
            range = range.after(&cursor_key);
        }
    }

    let rows = tx.get_range(&range, limit.saturating_add(1), reverse).await?;
    let has_more = rows.len() > limit;
    let mut records = Vec::with_capacity(rows.len().min(limit));
    for row in rows.into_iter().take(limit) {
        records.push(Record::decode(&row.value)?);
    }
    let next_cursor = if has_more {
        records.last().map(|r| r.rkey.as_str().to_string())
    } else {
        None
    };
    Ok(RecordPage {
        records,
        next_cursor,
    })
}

/// Collections of `did` with a strictly positive record count, in key order.
pub(crate) async fn get_collections_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
) -> Result<Vec<Nsid>> {
    use heddle_kv::NO_LIMIT;
    use heddle_kv::tuple::Element;

    let range = keyspace
        .collection_counts
        .range_of(&[Element::Str(did.as_str())]);
    let rows = tx.get_range(&range, NO_LIMIT, false).await?;

    let mut collections = Vec::new();
    for row in rows {
        let count = decode_count(&row.value)?;
        if count <= 0 {
            continue;
        }
        let elements = keyspace
            .collection_counts
            .unpack(&row.key)
            .ok_or_else(|| StoreError::Serialization("count key outside subspace".into()))??;
        let name: &str = elements
            .get(1)
            .and_then(|e| e.as_str())
            .ok_or_else(|| StoreError::Serialization("malformed count key".into()))?;
        collections.push(
            Nsid::new(name).map_err(|e| StoreError::Serialization(Box::new(e)))?,
        );
    }
    Ok(collections)
}

fn decode_count(bytes: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("counter of {} bytes", bytes.len()).into()))?;
    Ok(i64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use heddle_kv::{Kv, MemoryKv};

    fn test_record(rkey: &str) -> Record {
        Record::new(
            Did::raw("did:plc:a1"),
            Nsid::raw("app.test.post"),
            RecordKey::raw(rkey),
            b"payload".to_vec(),
        )
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut record = test_record("3jqf");
        record.cid = "bafyexample".into();
        let back = Record::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn empty_value_is_invalid() {
        let mut record = test_record("3jqf");
        record.value = ByteBuf::new();
        assert!(matches!(
            record.validate().unwrap_err(),
            StoreError::InvalidRecord(_)
        ));
    }

    #[tokio::test]
    async fn list_paginates_with_cursor() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();
        let did = Did::raw("did:plc:a1");
        let collection = Nsid::raw("app.test.post");

        let tx = kv.transaction().unwrap();
        for rkey in ["a", "b", "c", "d", "e"] {
            save_record_tx(&tx, &ks, &test_record(rkey)).unwrap();
        }
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let page = list_records_tx(&tx, &ks, &did, &collection, 2, None, false)
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.rkey.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(page.next_cursor.as_deref(), Some("b"));

        let page = list_records_tx(&tx, &ks, &did, &collection, 2, Some("b"), false)
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.rkey.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);

        // Final page: no further cursor.
        let page = list_records_tx(&tx, &ks, &did, &collection, 2, Some("d"), false)
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.rkey.as_str()).collect();
        assert_eq!(keys, vec!["e"]);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn list_reverse_descends() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();
        let did = Did::raw("did:plc:a1");
        let collection = Nsid::raw("app.test.post");

        let tx = kv.transaction().unwrap();
        for rkey in ["a", "b", "c"] {
            save_record_tx(&tx, &ks, &test_record(rkey)).unwrap();
        }
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let page = list_records_tx(&tx, &ks, &did, &collection, 10, None, true)
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.rkey.as_str()).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);

        let page = list_records_tx(&tx, &ks, &did, &collection, 10, Some("c"), true)
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.rkey.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn collections_require_positive_count() {
        let kv = MemoryKv::new();
        let ks = Keyspace::new();
        let did = Did::raw("did:plc:a1");

        let tx = kv.transaction().unwrap();
        bump_collection_count(&tx, &ks, &did, "app.test.post", 2);
        bump_collection_count(&tx, &ks, &did, "app.test.like", 1);
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        bump_collection_count(&tx, &ks, &did, "app.test.like", -1);
        tx.commit().await.unwrap();

        let tx = kv.transaction().unwrap();
        let collections = get_collections_tx(&tx, &ks, &did).await.unwrap();
        let names: Vec<&str> = collections.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["app.test.post"]);
    }
}
