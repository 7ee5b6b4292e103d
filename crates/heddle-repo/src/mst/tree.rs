//! MST operations
//!
//! The tree is held as a flat `Vec<NodeEntry>` per node, with subtrees and
//! leaves interleaved. Operations return new `Mst` values sharing unchanged
//! subtrees with their predecessor, so a transaction can hold both the loaded
//! state and the mutated state cheaply. Nothing is persisted until
//! [`Mst::write_diff_blocks`] runs.
//!
//! Keys are assigned to layers by hashing: layer = half the count of leading
//! zero bits of `sha256(key)`. Higher layers sit nearer the root. The layout
//! is therefore canonical: the same set of `(key, cid)` pairs always yields
//! the same root CID.

use super::node::NodeEntry;
use super::util;
use crate::error::{RepoError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Ordered, content-addressed map from record paths to record CIDs
///
/// Cheap to clone; clones share storage and any already-loaded nodes.
#[derive(Clone)]
pub struct Mst<S> {
    /// Block storage for loading and spilling nodes
    storage: Arc<S>,

    /// Entries of this node. `None` until loaded from storage; an empty vec
    /// is a loaded, empty node.
    entries: Arc<RwLock<Option<Vec<NodeEntry<S>>>>>,

    /// CID of this node. Stale while `dirty` is set.
    pointer: Arc<RwLock<Cid>>,

    /// Whether `pointer` needs recomputing from `entries`.
    dirty: Arc<RwLock<bool>>,

    /// Layer hint; `None` means unknown until computed from entries.
    layer: Option<usize>,
}

impl<S> std::fmt::Debug for Mst<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mst")
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}

impl<S: BlockStore + Sync + 'static> Mst<S> {
    /// Create an empty tree.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            entries: Arc::new(RwLock::new(Some(Vec::new()))),
            pointer: Arc::new(RwLock::new(Cid::default())),
            dirty: Arc::new(RwLock::new(true)),
            layer: Some(0),
        }
    }

    /// Reference a tree by root CID without loading it.
    pub fn load(storage: Arc<S>, root: Cid, layer: Option<usize>) -> Self {
        Self {
            storage,
            entries: Arc::new(RwLock::new(None)),
            pointer: Arc::new(RwLock::new(root)),
            dirty: Arc::new(RwLock::new(false)),
            layer,
        }
    }

    /// Build a node from known entries, computing its CID eagerly.
    pub(crate) async fn create(
        storage: Arc<S>,
        entries: Vec<NodeEntry<S>>,
        layer: Option<usize>,
    ) -> Result<Self> {
        let node_data = util::serialize_node_data(&entries).await?;
        let cbor = serde_ipld_dagcbor::to_vec(&node_data).map_err(RepoError::serialization)?;
        let cid = crate::storage::compute_cid(&cbor)?;

        Ok(Self {
            storage,
            entries: Arc::new(RwLock::new(Some(entries))),
            pointer: Arc::new(RwLock::new(cid)),
            dirty: Arc::new(RwLock::new(false)),
            layer,
        })
    }

    /// Derive a sibling of this node with different entries.
    ///
    /// The pointer state is fresh, not shared with the source node, so
    /// recomputing one sibling's CID cannot clobber another's.
    async fn with_entries(&self, entries: Vec<NodeEntry<S>>) -> Result<Self> {
        Ok(Self {
            storage: self.storage.clone(),
            entries: Arc::new(RwLock::new(Some(entries))),
            pointer: Arc::new(RwLock::new(*self.pointer.read().await)),
            dirty: Arc::new(RwLock::new(true)),
            layer: self.layer,
        })
    }

    /// Entries of this node, loading from storage on first access.
    async fn entries(&self) -> Result<Vec<NodeEntry<S>>> {
        {
            let guard = self.entries.read().await;
            if let Some(entries) = guard.as_ref() {
                return Ok(entries.clone());
            }
        }

        let pointer = *self.pointer.read().await;
        let bytes = self
            .storage
            .get(&pointer)
            .await?
            .ok_or(RepoError::MissingBlock(pointer))?;
        let node_data: super::node::NodeData =
            serde_ipld_dagcbor::from_slice(&bytes).map_err(RepoError::serialization)?;
        let entries = util::deserialize_node_data(self.storage.clone(), &node_data, self.layer)?;

        let mut guard = self.entries.write().await;
        *guard = Some(entries.clone());
        Ok(entries)
    }

    /// Root CID of this node, recomputed from entries when stale.
    ///
    /// Computing the CID does not persist anything.
    pub fn root<'a>(&'a self) -> BoxFuture<'a, Result<Cid>> {
        Box::pin(async move {
            if !*self.dirty.read().await {
                return Ok(*self.pointer.read().await);
            }

            let entries = self.entries().await?;
            let node_data = util::serialize_node_data(&entries).await?;
            let cbor = serde_ipld_dagcbor::to_vec(&node_data).map_err(RepoError::serialization)?;
            let cid = crate::storage::compute_cid(&cbor)?;

            *self.pointer.write().await = cid;
            *self.dirty.write().await = false;
            Ok(cid)
        })
    }

    /// The bound block storage.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Layer of this node: the layer of any leaf it holds, or one above its
    /// first subtree, or zero when empty.
    fn layer_of<'a>(&'a self) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if let Some(layer) = self.layer {
                return Ok(layer);
            }
            let entries = self.entries().await?;
            for entry in &entries {
                if let NodeEntry::Leaf { key, .. } = entry {
                    return Ok(util::layer_for_key(key.as_str()));
                }
            }
            for entry in &entries {
                if let NodeEntry::Tree(subtree) = entry {
                    return Ok(subtree.layer_of().await? + 1);
                }
            }
            Ok(0)
        })
    }

    /// Index of the first leaf with key >= `key`, or `entries.len()`.
    fn leaf_index_at_or_after(entries: &[NodeEntry<S>], key: &str) -> usize {
        for (i, entry) in entries.iter().enumerate() {
            if let NodeEntry::Leaf { key: leaf_key, .. } = entry {
                if leaf_key.as_str() >= key {
                    return i;
                }
            }
        }
        entries.len()
    }

    /// Point lookup.
    pub fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Cid>>> {
        Box::pin(async move {
            util::validate_key(key)?;
            self.get_unchecked(key).await
        })
    }

    fn get_unchecked<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Cid>>> {
        Box::pin(async move {
            let entries = self.entries().await?;
            let index = Self::leaf_index_at_or_after(&entries, key);

            if let Some(NodeEntry::Leaf {
                key: leaf_key,
                value,
            }) = entries.get(index)
            {
                if leaf_key.as_str() == key {
                    return Ok(Some(*value));
                }
            }

            // Not at this layer; descend into the subtree left of the
            // insertion point.
            if index > 0 {
                if let Some(NodeEntry::Tree(subtree)) = entries.get(index - 1) {
                    return subtree.get_unchecked(key).await;
                }
            }
            Ok(None)
        })
    }

    /// Insert or replace a key. Returns the new tree and the prior CID at
    /// that key, if any.
    pub async fn insert(&self, key: &str, cid: Cid) -> Result<(Self, Option<Cid>)> {
        util::validate_key(key)?;
        let prior = self.get_unchecked(key).await?;
        let tree = self.put_at_layer(key, cid).await?;
        Ok((tree, prior))
    }

    /// Remove a key. Returns the new tree and the prior CID; the tree is
    /// returned unchanged when the key is absent.
    pub async fn remove(&self, key: &str) -> Result<(Self, Option<Cid>)> {
        util::validate_key(key)?;
        let Some(prior) = self.get_unchecked(key).await? else {
            return Ok((self.clone(), None));
        };
        let altered = self.remove_recurse(key).await?;
        let trimmed = altered.trim_top().await?;
        Ok((trimmed, Some(prior)))
    }

    fn put_at_layer<'a>(&'a self, key: &'a str, cid: Cid) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            let key_layer = util::layer_for_key(key);
            let node_layer = self.layer_of().await?;
            let entries = self.entries().await?;

            if key_layer == node_layer {
                let index = Self::leaf_index_at_or_after(&entries, key);

                // Replace in place when the key is already here.
                if let Some(NodeEntry::Leaf { key: leaf_key, .. }) = entries.get(index) {
                    if leaf_key.as_str() == key {
                        let mut new_entries = entries.clone();
                        new_entries[index] = NodeEntry::Leaf {
                            key: SmolStr::new(key),
                            value: cid,
                        };
                        return self.with_entries(new_entries).await;
                    }
                }

                let leaf = NodeEntry::Leaf {
                    key: SmolStr::new(key),
                    value: cid,
                };
                match (index > 0).then(|| &entries[index - 1]) {
                    Some(NodeEntry::Tree(subtree)) => {
                        // The preceding subtree straddles the new key; split it.
                        let (left, right) = subtree.split_around(key).await?;
                        self.replace_with_split(index - 1, left, leaf, right).await
                    }
                    _ => self.splice_in(leaf, index).await,
                }
            } else if key_layer < node_layer {
                // Descend.
                let index = Self::leaf_index_at_or_after(&entries, key);
                if index > 0 {
                    if let NodeEntry::Tree(subtree) = &entries[index - 1] {
                        let new_subtree = subtree.put_at_layer(key, cid).await?;
                        return self
                            .update_entry(index - 1, NodeEntry::Tree(new_subtree))
                            .await;
                    }
                }
                let child = self.create_child().await?;
                let new_subtree = child.put_at_layer(key, cid).await?;
                self.splice_in(NodeEntry::Tree(new_subtree), index).await
            } else {
                // Key lives above this node: split and grow new root layers.
                let extra_layers = key_layer - node_layer;
                let (mut left, mut right) = self.split_around(key).await?;
                for _ in 1..extra_layers {
                    if let Some(l) = left {
                        left = Some(l.create_parent().await?);
                    }
                    if let Some(r) = right {
                        right = Some(r.create_parent().await?);
                    }
                }

                let mut new_entries = Vec::new();
                if let Some(l) = left {
                    new_entries.push(NodeEntry::Tree(l));
                }
                new_entries.push(NodeEntry::Leaf {
                    key: SmolStr::new(key),
                    value: cid,
                });
                if let Some(r) = right {
                    new_entries.push(NodeEntry::Tree(r));
                }
                Mst::create(self.storage.clone(), new_entries, Some(key_layer)).await
            }
        })
    }

    fn remove_recurse<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            let entries = self.entries().await?;
            let index = Self::leaf_index_at_or_after(&entries, key);

            if let Some(NodeEntry::Leaf { key: leaf_key, .. }) = entries.get(index) {
                if leaf_key.as_str() == key {
                    let prev = (index > 0).then(|| &entries[index - 1]);
                    let next = entries.get(index + 1);
                    // Removing a leaf between two subtrees merges them.
                    if let (Some(NodeEntry::Tree(prev_tree)), Some(NodeEntry::Tree(next_tree))) =
                        (prev, next)
                    {
                        let merged = prev_tree.append_merge(next_tree).await?;
                        let mut new_entries = entries[..index - 1].to_vec();
                        new_entries.push(NodeEntry::Tree(merged));
                        new_entries.extend_from_slice(&entries[index + 2..]);
                        return self.with_entries(new_entries).await;
                    }
                    return self.remove_entry(index).await;
                }
            }

            if index > 0 {
                if let NodeEntry::Tree(subtree) = &entries[index - 1] {
                    let new_subtree = subtree.remove_recurse(key).await?;
                    if new_subtree.entries().await?.is_empty() {
                        return self.remove_entry(index - 1).await;
                    }
                    return self
                        .update_entry(index - 1, NodeEntry::Tree(new_subtree))
                        .await;
                }
            }

            Err(RepoError::InvalidMst(format!("key not in tree: {key}")))
        })
    }

    async fn update_entry(&self, index: usize, entry: NodeEntry<S>) -> Result<Self> {
        let mut entries = self.entries().await?;
        entries[index] = entry;
        self.with_entries(entries).await
    }

    async fn remove_entry(&self, index: usize) -> Result<Self> {
        let mut entries = self.entries().await?;
        entries.remove(index);
        self.with_entries(entries).await
    }

    async fn splice_in(&self, entry: NodeEntry<S>, index: usize) -> Result<Self> {
        let mut entries = self.entries().await?;
        entries.insert(index, entry);
        self.with_entries(entries).await
    }

    async fn append(&self, entry: NodeEntry<S>) -> Result<Self> {
        let mut entries = self.entries().await?;
        entries.push(entry);
        self.with_entries(entries).await
    }

    async fn prepend(&self, entry: NodeEntry<S>) -> Result<Self> {
        let mut entries = self.entries().await?;
        entries.insert(0, entry);
        self.with_entries(entries).await
    }

    /// Drop single-subtree root nodes left behind by removals.
    fn trim_top(self) -> BoxFuture<'static, Result<Self>> {
        Box::pin(async move {
            let entries = self.entries().await?;
            if entries.len() == 1 {
                if let NodeEntry::Tree(subtree) = &entries[0] {
                    return subtree.clone().trim_top().await;
                }
            }
            Ok(self)
        })
    }

    /// Split into (< key, >= key) subtrees; either side may be empty.
    fn split_around<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(Option<Self>, Option<Self>)>> {
        Box::pin(async move {
            let entries = self.entries().await?;
            let index = Self::leaf_index_at_or_after(&entries, key);

            let left_data = entries[..index].to_vec();
            let right_data = entries[index..].to_vec();
            let mut left = self.with_entries(left_data.clone()).await?;
            let mut right = self.with_entries(right_data).await?;

            // A subtree on the split boundary may itself straddle the key.
            if let Some(NodeEntry::Tree(boundary)) = left_data.last() {
                left = left.remove_entry(left_data.len() - 1).await?;
                let (split_left, split_right) = boundary.split_around(key).await?;
                if let Some(sl) = split_left {
                    left = left.append(NodeEntry::Tree(sl)).await?;
                }
                if let Some(sr) = split_right {
                    right = right.prepend(NodeEntry::Tree(sr)).await?;
                }
            }

            let left_out = if left.entries().await?.is_empty() {
                None
            } else {
                Some(left)
            };
            let right_out = if right.entries().await?.is_empty() {
                None
            } else {
                Some(right)
            };
            Ok((left_out, right_out))
        })
    }

    /// Concatenate a same-layer tree whose keys all sort after this one's.
    fn append_merge<'a>(&'a self, other: &'a Self) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            if self.layer_of().await? != other.layer_of().await? {
                return Err(RepoError::InvalidMst(
                    "cannot merge MST nodes from different layers".into(),
                ));
            }

            let mut self_entries = self.entries().await?;
            let other_entries = other.entries().await?;

            if let (Some(NodeEntry::Tree(left_tree)), Some(NodeEntry::Tree(right_tree))) =
                (self_entries.last(), other_entries.first())
            {
                let merged = left_tree.append_merge(right_tree).await?;
                let mut new_entries = self_entries[..self_entries.len() - 1].to_vec();
                new_entries.push(NodeEntry::Tree(merged));
                new_entries.extend_from_slice(&other_entries[1..]);
                return self.with_entries(new_entries).await;
            }

            self_entries.extend(other_entries);
            self.with_entries(self_entries).await
        })
    }

    async fn create_child(&self) -> Result<Self> {
        let layer = self.layer_of().await?;
        Mst::create(
            self.storage.clone(),
            Vec::new(),
            Some(layer.saturating_sub(1)),
        )
        .await
    }

    async fn create_parent(self) -> Result<Self> {
        let layer = self.layer_of().await?;
        Mst::create(
            self.storage.clone(),
            vec![NodeEntry::Tree(self)],
            Some(layer + 1),
        )
        .await
    }

    async fn replace_with_split(
        &self,
        index: usize,
        left: Option<Self>,
        leaf: NodeEntry<S>,
        right: Option<Self>,
    ) -> Result<Self> {
        let entries = self.entries().await?;
        let mut new_entries = entries[..index].to_vec();
        if let Some(l) = left {
            new_entries.push(NodeEntry::Tree(l));
        }
        new_entries.push(leaf);
        if let Some(r) = right {
            new_entries.push(NodeEntry::Tree(r));
        }
        new_entries.extend_from_slice(&entries[index + 1..]);
        self.with_entries(new_entries).await
    }

    /// All `(key, cid)` pairs in lexicographic key order.
    pub fn leaves<'a>(&'a self) -> BoxFuture<'a, Result<Vec<(SmolStr, Cid)>>> {
        Box::pin(async move {
            let mut out = Vec::new();
            self.collect_leaves(&mut out).await?;
            Ok(out)
        })
    }

    fn collect_leaves<'a>(
        &'a self,
        out: &'a mut Vec<(SmolStr, Cid)>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for entry in self.entries().await? {
                match entry {
                    NodeEntry::Tree(subtree) => subtree.collect_leaves(out).await?,
                    NodeEntry::Leaf { key, value } => out.push((key, value)),
                }
            }
            Ok(())
        })
    }

    /// Serialize every node not already in storage, keyed by CID.
    ///
    /// A node found in storage is skipped along with its whole subtree:
    /// content addressing guarantees its children were stored with it.
    fn collect_new_blocks<'a>(&'a self) -> BoxFuture<'a, Result<(Cid, BTreeMap<Cid, Bytes>)>> {
        Box::pin(async move {
            let mut blocks = BTreeMap::new();
            let root = self.root().await?;

            if self.storage.has(&root).await? {
                return Ok((root, blocks));
            }

            let entries = self.entries().await?;
            let node_data = util::serialize_node_data(&entries).await?;
            let cbor = serde_ipld_dagcbor::to_vec(&node_data).map_err(RepoError::serialization)?;
            blocks.insert(root, Bytes::from(cbor));

            for entry in &entries {
                if let NodeEntry::Tree(subtree) = entry {
                    let (_, subtree_blocks) = subtree.collect_new_blocks().await?;
                    blocks.extend(subtree_blocks);
                }
            }
            Ok((root, blocks))
        })
    }

    /// Write every newly created node to the bound block store and return the
    /// new root CID. Nodes already present are left untouched.
    pub async fn write_diff_blocks(&self) -> Result<Cid> {
        let (root, blocks) = self.collect_new_blocks().await?;
        if !blocks.is_empty() {
            self.storage.put_many(blocks).await?;
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;

    fn test_cid(n: u8) -> Cid {
        crate::storage::compute_cid(&[n]).unwrap()
    }

    async fn insert(mst: Mst<MemoryBlockStore>, key: &str, n: u8) -> Mst<MemoryBlockStore> {
        mst.insert(key, test_cid(n)).await.unwrap().0
    }

    #[tokio::test]
    async fn empty_tree_lookups() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        assert_eq!(mst.get("test/key").await.unwrap(), None);
        assert!(mst.leaves().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_and_get() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        let (mst, prior) = mst.insert("test/key", test_cid(1)).await.unwrap();
        assert_eq!(prior, None);
        assert_eq!(mst.get("test/key").await.unwrap(), Some(test_cid(1)));
    }

    #[tokio::test]
    async fn insert_returns_prior_on_replace() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        let mst = insert(mst, "test/key", 1).await;
        let (mst, prior) = mst.insert("test/key", test_cid(2)).await.unwrap();
        assert_eq!(prior, Some(test_cid(1)));
        assert_eq!(mst.get("test/key").await.unwrap(), Some(test_cid(2)));
    }

    #[tokio::test]
    async fn multiple_keys() {
        let mut mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            mst = insert(mst, key, i as u8 + 1).await;
        }
        assert_eq!(mst.get("a").await.unwrap(), Some(test_cid(1)));
        assert_eq!(mst.get("b").await.unwrap(), Some(test_cid(2)));
        assert_eq!(mst.get("c").await.unwrap(), Some(test_cid(3)));
        assert_eq!(mst.get("d").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_returns_prior() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        let mst = insert(mst, "a", 1).await;
        let mst = insert(mst, "b", 2).await;
        let (mst, prior) = mst.remove("a").await.unwrap();
        assert_eq!(prior, Some(test_cid(1)));
        assert_eq!(mst.get("a").await.unwrap(), None);
        assert_eq!(mst.get("b").await.unwrap(), Some(test_cid(2)));
    }

    #[tokio::test]
    async fn remove_missing_is_noop() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        let mst = insert(mst, "a", 1).await;
        let root_before = mst.root().await.unwrap();
        let (mst, prior) = mst.remove("zzz").await.unwrap();
        assert_eq!(prior, None);
        assert_eq!(mst.root().await.unwrap(), root_before);
    }

    #[tokio::test]
    async fn leaves_in_key_order() {
        let mut mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        for key in ["c/3", "a/1", "b/2", "a/0"] {
            mst = insert(mst, key, 9).await;
        }
        let leaves = mst.leaves().await.unwrap();
        let got: Vec<&str> = leaves.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(got, vec!["a/0", "a/1", "b/2", "c/3"]);
    }

    #[tokio::test]
    async fn root_is_deterministic() {
        let build = |keys: Vec<&'static str>| async move {
            let mut mst = Mst::new(Arc::new(MemoryBlockStore::new()));
            for key in keys {
                mst = insert(mst, key, 7).await;
            }
            mst.root().await.unwrap()
        };
        let a = build(vec!["x/1", "x/2", "x/3"]).await;
        let b = build(vec!["x/3", "x/1", "x/2"]).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn removal_restores_prior_root() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mut mst = Mst::new(storage);
        for key in ["k/1", "k/2", "k/3"] {
            mst = insert(mst, key, 5).await;
        }
        let root_of_three = mst.root().await.unwrap();

        let mst = insert(mst, "k/4", 6).await;
        let (mst, _) = mst.remove("k/4").await.unwrap();
        assert_eq!(mst.root().await.unwrap(), root_of_three);
    }

    #[tokio::test]
    async fn write_diff_blocks_persists_reloadable_tree() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mut mst = Mst::new(storage.clone());
        for (i, key) in ["app.test.a/1", "app.test.a/2", "app.test.b/1"]
            .iter()
            .enumerate()
        {
            mst = insert(mst, key, i as u8).await;
        }
        let root = mst.write_diff_blocks().await.unwrap();

        let reloaded = Mst::load(storage, root, None);
        assert_eq!(
            reloaded.get("app.test.a/1").await.unwrap(),
            Some(test_cid(0))
        );
        assert_eq!(
            reloaded.get("app.test.b/1").await.unwrap(),
            Some(test_cid(2))
        );
        assert_eq!(reloaded.leaves().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn write_diff_blocks_skips_stored_nodes() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mut mst = Mst::new(storage.clone());
        for i in 0..20u8 {
            mst = insert(mst, &format!("app.test.post/{i:02}"), i).await;
        }
        mst.write_diff_blocks().await.unwrap();
        let blocks_after_first = storage.len();

        let mst = insert(mst, "app.test.post/99", 99).await;
        let root = mst.write_diff_blocks().await.unwrap();
        assert!(storage.len() > blocks_after_first);

        let reloaded = Mst::load(storage, root, None);
        assert_eq!(
            reloaded.get("app.test.post/99").await.unwrap(),
            Some(test_cid(99))
        );
        assert_eq!(reloaded.leaves().await.unwrap().len(), 21);
    }

    #[tokio::test]
    async fn many_keys_roundtrip_through_storage() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mut mst = Mst::new(storage.clone());
        for i in 0..100u8 {
            mst = insert(mst, &format!("app.test.post/{i:03}"), i).await;
        }
        let root = mst.write_diff_blocks().await.unwrap();

        let reloaded = Mst::load(storage, root, None);
        for i in 0..100u8 {
            assert_eq!(
                reloaded
                    .get(&format!("app.test.post/{i:03}"))
                    .await
                    .unwrap(),
                Some(test_cid(i))
            );
        }
        assert_eq!(reloaded.leaves().await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn rejects_invalid_keys() {
        let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        assert!(mst.get("").await.is_err());
        assert!(mst.insert("bad key", test_cid(1)).await.is_err());
    }
}
