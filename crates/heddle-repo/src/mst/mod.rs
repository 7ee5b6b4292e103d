//! Merkle Search Tree
//!
//! Ordered, content-addressed map from record paths
//! (`"<collection>/<rkey>"`) to record CIDs. Identical logical content
//! produces identical root CIDs regardless of mutation order.

pub mod node;
pub mod tree;
pub mod util;

pub use node::{NodeData, NodeEntry, TreeEntry};
pub use tree::Mst;
