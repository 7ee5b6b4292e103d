//! Validated AT Protocol identifier types
//!
//! Every identifier that crosses the storage engine's boundary is parsed into
//! a newtype that enforces the protocol's syntax rules at construction time:
//!
//! - [`Did`]: decentralized identifier, the primary key of an actor
//! - [`Handle`]: human-readable actor alias
//! - [`Nsid`]: namespaced collection identifier
//! - [`RecordKey`]: record key within a collection
//! - [`Tid`]: timestamp identifier, used for record keys and commit revisions
//! - [`Datetime`]: RFC 3339 wall-clock timestamp
//! - [`AtUri`]: `at://` URI naming a single record
//!
//! Types are stored owned (backed by [`smol_str::SmolStr`]) since the engine
//! persists everything it touches.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod aturi;
pub mod datetime;
pub mod did;
pub mod error;
pub mod handle;
pub mod nsid;
pub mod rkey;
pub mod tid;

pub use aturi::AtUri;
pub use datetime::Datetime;
pub use did::Did;
pub use error::{ParseError, ParseProblem};
pub use handle::Handle;
pub use nsid::Nsid;
pub use rkey::RecordKey;
pub use tid::{Tid, TidClock};
