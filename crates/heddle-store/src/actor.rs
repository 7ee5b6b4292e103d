//! Actor rows and secondary indexes

use crate::error::{Result, StoreError};
use crate::keyspace::Keyspace;
use heddle_kv::Transaction;
use heddle_types::{Datetime, Did, Handle, Tid};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Serialization version written into new actor rows.
pub const ACTOR_VERSION: u32 = 1;

/// An outstanding refresh-token record on an actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Token identifier (jti)
    pub id: String,
    /// Expiry time
    pub expires_at: Datetime,
}

/// One tenant account
///
/// Persisted as DAG-CBOR under `actors (did)`. The `head`/`rev` pair is the
/// repository pointer: `head` names the latest commit block in the actor's
/// own blockstore and `rev` is that commit's revision. Both are unset until
/// `init_repo` runs. Actors are never deleted; deactivation clears `active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    /// Serialization version
    pub version: u32,
    /// Primary key
    pub did: Did,
    /// Globally unique human-readable alias
    pub handle: Handle,
    /// Email address, unique within a PDS host
    pub email: String,
    /// Logical tenant boundary this actor lives on
    pub pds_host: String,
    /// Account creation time
    pub created_at: Datetime,
    /// Whether the email has been verified
    pub email_verified: bool,
    /// Password hash bytes (opaque to the engine)
    pub password_hash: ByteBuf,
    /// secp256k1 signing key material
    pub signing_key: ByteBuf,
    /// Rotation key materials; at least one
    pub rotation_keys: Vec<ByteBuf>,
    /// Deactivation flag
    pub active: bool,
    /// CID of the latest commit, as a string; unset before `init_repo`
    pub head: Option<String>,
    /// Revision of the latest commit; unset before `init_repo`
    pub rev: Option<Tid>,
    /// Outstanding refresh tokens
    pub refresh_tokens: Vec<RefreshToken>,
}

impl Actor {
    /// Check required fields: signing key material and at least one rotation
    /// key. Handle, DID, and creation time are enforced by their types.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.is_empty() {
            return Err(StoreError::InvalidActor("empty signing key".into()));
        }
        if self.rotation_keys.is_empty() {
            return Err(StoreError::InvalidActor("no rotation keys".into()));
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

/// Write the actor row and refresh its secondary indexes.
///
/// Handle and email index entries are overwritten at their *new* values
/// only; entries under prior values stay behind and keep resolving to the
/// same actor. Uniqueness of handles is the caller's responsibility.
pub(crate) fn save_actor_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    actor: &Actor,
) -> Result<()> {
    actor.validate()?;
    tx.set(&keyspace.actor_key(&actor.did), &actor.encode()?);
    tx.set(
        &keyspace.handle_key(actor.handle.as_str()),
        actor.did.as_str().as_bytes(),
    );
    tx.set(
        &keyspace.email_key(&actor.pds_host, &actor.email),
        actor.did.as_str().as_bytes(),
    );
    tx.set(&keyspace.host_key(&actor.pds_host, &actor.did), b"");
    Ok(())
}

/// Read an actor row, `None` when absent.
pub(crate) async fn get_actor_tx<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    did: &Did,
) -> Result<Option<Actor>> {
    match tx.get(&keyspace.actor_key(did)).await? {
        Some(bytes) => Ok(Some(Actor::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Resolve a secondary index value (did bytes) and hydrate the actor.
pub(crate) async fn resolve_indexed_actor<T: Transaction>(
    tx: &T,
    keyspace: &Keyspace,
    index_key: &[u8],
    description: &str,
) -> Result<Actor> {
    let did_bytes = tx
        .get(index_key)
        .await?
        .ok_or_else(|| StoreError::not_found(description.to_string()))?;
    let did_str = std::str::from_utf8(&did_bytes)
        .map_err(|e| StoreError::Serialization(Box::new(e)))?;
    let did = Did::new(did_str).map_err(|e| StoreError::Serialization(Box::new(e)))?;
    get_actor_tx(tx, keyspace, &did)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("actor {did}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn test_actor(did: &str, handle: &str) -> Actor {
        Actor {
            version: ACTOR_VERSION,
            did: Did::raw(did),
            handle: Handle::raw(handle),
            email: format!("{handle}@example.com"),
            pds_host: "h1".into(),
            created_at: Datetime::now(),
            email_verified: false,
            password_hash: ByteBuf::from(vec![1, 2, 3]),
            signing_key: ByteBuf::from(vec![7; 32]),
            rotation_keys: vec![ByteBuf::from(vec![8; 32])],
            active: true,
            head: None,
            rev: None,
            refresh_tokens: Vec::new(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut actor = test_actor("did:plc:a1", "a.example");
        actor.refresh_tokens.push(RefreshToken {
            id: "jti-1".into(),
            expires_at: Datetime::now(),
        });
        let bytes = actor.encode().unwrap();
        let back = Actor::decode(&bytes).unwrap();
        assert_eq!(back, actor);
    }

    #[test]
    fn validation_requires_key_material() {
        let mut actor = test_actor("did:plc:a1", "a.example");
        actor.signing_key = ByteBuf::new();
        assert!(matches!(
            actor.validate().unwrap_err(),
            StoreError::InvalidActor(_)
        ));

        let mut actor = test_actor("did:plc:a1", "a.example");
        actor.rotation_keys.clear();
        assert!(matches!(
            actor.validate().unwrap_err(),
            StoreError::InvalidActor(_)
        ));
    }
}
