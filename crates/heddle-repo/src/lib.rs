//! Content-addressed repository primitives
//!
//! The building blocks of a per-actor signed data repository:
//!
//! - **MST (Merkle Search Tree)**: ordered, content-addressed map from record
//!   paths to record CIDs, with deterministic structure
//! - **Commits**: signed envelopes referencing an MST root and their
//!   predecessor
//! - **CAR**: content-addressed archive bytes carried on firehose events
//! - **Storage**: pluggable CID-addressed block storage
//!
//! The storage engine binds [`BlockStore`] to a per-actor, per-transaction
//! view of its key-value backend; [`MemoryBlockStore`] serves tests.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod car;
pub mod commit;
pub mod error;
pub mod mst;
pub mod storage;

pub use commit::{Commit, SigningKey, COMMIT_VERSION};
pub use error::{RepoError, Result};
pub use mst::Mst;
pub use storage::{BlockStore, MemoryBlockStore, compute_cid};

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR: u64 = 0x71;

/// SHA2-256 multihash code (0x12)
pub const SHA2_256: u64 = 0x12;
