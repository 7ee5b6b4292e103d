//! MST node representations

use std::fmt;

use cid::Cid;
use smol_str::SmolStr;

use crate::mst::Mst;

/// Entry in an MST node: a subtree pointer or a leaf
///
/// In memory a node is a flat `Vec<NodeEntry>` with subtrees and leaves
/// interleaved, e.g. `[Tree, Leaf, Tree, Leaf, Leaf, Tree]`. The wire form is
/// different; see [`NodeData`].
#[derive(Clone)]
pub enum NodeEntry<S> {
    /// Subtree, lazily loaded from storage when accessed
    Tree(Mst<S>),

    /// Leaf holding a full (uncompressed) key and the record CID
    Leaf {
        /// Full record path
        key: SmolStr,
        /// CID of the record block
        value: Cid,
    },
}

impl<S> fmt::Debug for NodeEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEntry::Tree(t) => write!(f, "{t:?}"),
            NodeEntry::Leaf { key, value } => {
                write!(f, "Leaf {{ key: {key}, value: {value} }}")
            }
        }
    }
}

impl<S> NodeEntry<S> {
    /// The key if this entry is a leaf.
    pub fn leaf_key(&self) -> Option<&str> {
        match self {
            NodeEntry::Leaf { key, .. } => Some(key.as_str()),
            NodeEntry::Tree(_) => None,
        }
    }
}

/// Wire-format entry: prefix-compressed leaf plus optional subtree pointer
///
/// Field names and order (`k`, `p`, `t`, `v`) are fixed by the protocol's
/// canonical node encoding.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeEntry {
    /// Key suffix after the shared prefix, as a CBOR byte string
    #[serde(rename = "k", with = "serde_bytes")]
    pub key_suffix: Vec<u8>,

    /// Number of bytes shared with the previous key in this node
    #[serde(rename = "p")]
    pub prefix_len: u8,

    /// Subtree pointer between this leaf and the next; explicit null when
    /// absent, required for encoding determinism
    #[serde(rename = "t")]
    pub tree: Option<Cid>,

    /// CID of the record block
    #[serde(rename = "v")]
    pub value: Cid,
}

/// Wire-format node, serialized as DAG-CBOR
///
/// `l` is the left-most subtree pointer; every other subtree pointer hangs
/// off the entry preceding it. All options serialize as explicit nulls.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeData {
    /// Left-most subtree pointer
    #[serde(rename = "l")]
    pub left: Option<Cid>,

    /// Prefix-compressed entries in key order
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,
}
