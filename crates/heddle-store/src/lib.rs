//! Multi-tenant PDS repository storage engine
//!
//! Each tenant (an *actor*, keyed by DID) owns a signed, content-addressed
//! log of records organized in a Merkle Search Tree. This crate maps the
//! higher-level repository operations (`init_repo`, `create_record`,
//! `put_record`, `delete_record`, `apply_writes`) onto bundles of KV
//! mutations that commit atomically: block writes, MST diff spills, the
//! signed commit, the actor row and its secondary indexes, record and
//! collection indexes, and one versionstamped firehose event.
//!
//! # Guarantees
//!
//! - Index updates of one mutation commit atomically; readers never observe
//!   a partial mutation, and a failed mutation leaves state byte-identical.
//! - Per actor, firehose events carry strictly increasing revisions; across
//!   the whole store, event keys (versionstamps) are strictly increasing in
//!   true serialization order.
//! - `swap_commit` / `swap_record` tokens and the transactional re-read of
//!   the actor head detect every concurrent mutation
//!   ([`StoreError::ConcurrentModification`]).
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Store::open_memory(Config::default());
//! store.save_actor(&actor).await?;
//! store.init_repo(&actor).await?;
//! let actor = store.get_actor(&actor.did).await?;
//! let record = Record::new(actor.did.clone(), collection, rkey, cbor_bytes);
//! let written = store.create_record(&actor, record, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod actor;
pub mod blockstore;
pub mod config;
pub mod error;
pub mod firehose;
pub mod keyspace;
pub mod observe;
pub mod records;
pub mod repo;
pub mod store;
mod tid;

pub use actor::{Actor, RefreshToken};
pub use blockstore::TxBlockStore;
pub use config::Config;
pub use error::{Result, StoreError};
pub use firehose::{Event, EventOp, EventPage, OpAction};
pub use keyspace::Keyspace;
pub use observe::Metrics;
pub use records::{Record, RecordPage};
pub use repo::{ApplyWritesResult, CommitResult, RecordWriteResult, RepoWrite, WriteOutcome};
pub use store::{ActorPage, Store};
