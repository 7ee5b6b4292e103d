//! Signed commit envelopes
//!
//! A commit wraps an MST root in a signed, content-addressed envelope. The
//! actor's head is the CID of its latest commit; each commit names its
//! predecessor, forming the per-actor chain.

use crate::error::{RepoError, Result};
use cid::Cid;
use heddle_types::{Did, Tid};
use serde::{Deserialize, Serialize};

/// Protocol version written into new commits.
pub const COMMIT_VERSION: i64 = 3;

/// Repository commit envelope
///
/// Serialized as a DAG-CBOR map `{did, version, data, rev, prev, sig}`.
/// `prev` is an explicit null for the initial commit. The signing input is
/// the encoding *without* the `sig` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Repository DID
    pub did: Did,

    /// Protocol version (currently 3)
    pub version: i64,

    /// MST root CID
    pub data: Cid,

    /// Revision TID; strictly increasing along the chain
    pub rev: Tid,

    /// Previous commit CID; `None` for the initial commit
    pub prev: Option<Cid>,

    /// secp256k1 signature over the unsigned encoding
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
}

/// The sig-less view used as signing input.
#[derive(Serialize)]
struct UnsignedCommit<'a> {
    did: &'a Did,
    version: i64,
    data: &'a Cid,
    rev: &'a Tid,
    prev: &'a Option<Cid>,
}

impl Commit {
    /// Build an unsigned commit (empty signature, version 3).
    pub fn new_unsigned(did: Did, data: Cid, rev: Tid, prev: Option<Cid>) -> Self {
        Self {
            did,
            version: COMMIT_VERSION,
            data,
            rev,
            prev,
            sig: Vec::new(),
        }
    }

    /// Sign this commit.
    pub fn sign(mut self, key: &impl SigningKey) -> Result<Self> {
        let unsigned = self.unsigned_bytes()?;
        self.sig = key.sign_bytes(&unsigned)?;
        Ok(self)
    }

    /// The signing input: DAG-CBOR encoding without the `sig` field.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(&UnsignedCommit {
            did: &self.did,
            version: self.version,
            data: &self.data,
            rev: &self.rev,
            prev: &self.prev,
        })
        .map_err(RepoError::serialization)
    }

    /// Serialize to DAG-CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(RepoError::serialization)
    }

    /// Deserialize from DAG-CBOR.
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(data).map_err(RepoError::serialization)
    }

    /// CID of the serialized commit.
    pub fn to_cid(&self) -> Result<Cid> {
        crate::storage::compute_cid(&self.to_cbor()?)
    }

    /// Verify the signature against a compressed secp256k1 public key.
    pub fn verify(&self, public_key: &[u8]) -> Result<()> {
        use k256::ecdsa::signature::Verifier;
        use k256::ecdsa::{Signature, VerifyingKey};

        let verifying_key =
            VerifyingKey::from_sec1_bytes(public_key).map_err(RepoError::crypto)?;
        let signature = Signature::from_slice(&self.sig).map_err(RepoError::crypto)?;
        let unsigned = self.unsigned_bytes()?;
        verifying_key
            .verify(&unsigned, &signature)
            .map_err(|_| RepoError::InvalidCommit("signature verification failed".into()))
    }
}

/// Commit signing keys.
///
/// Implemented for [`k256::ecdsa::SigningKey`]; the engine parses actor key
/// material into one of these before committing.
pub trait SigningKey {
    /// Sign `data`, returning the raw signature bytes.
    fn sign_bytes(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// The compressed public key bytes.
    fn public_key(&self) -> Vec<u8>;
}

impl SigningKey for k256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        use k256::ecdsa::signature::Signer;
        let sig: k256::ecdsa::Signature = Signer::sign(self, data);
        Ok(sig.to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }
}
