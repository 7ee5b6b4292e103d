//! MST helpers: key validation, layer assignment, wire conversion

use super::node::{NodeData, NodeEntry, TreeEntry};
use crate::error::{RepoError, Result};
use crate::storage::BlockStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Layer (depth band) for a key: `floor(leading_zero_bits(sha256(key)) / 2)`.
///
/// Counting two-bit chunks of leading zeros gives the tree a fanout of ~4,
/// deterministically and independent of insertion order.
pub fn layer_for_key(key: &str) -> usize {
    let hash = Sha256::digest(key.as_bytes());
    leading_zeros(&hash) / 2
}

fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Validate an MST key: `[a-zA-Z0-9._:~-/]`, 1..=256 bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(RepoError::InvalidKey {
            key: key.to_string(),
            reason: "empty",
        });
    }
    if key.len() > 256 {
        return Err(RepoError::InvalidKey {
            key: key.to_string(),
            reason: "longer than 256 bytes",
        });
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-' | '/'))
    {
        return Err(RepoError::InvalidKey {
            key: key.to_string(),
            reason: "disallowed characters",
        });
    }
    Ok(())
}

/// Length of the shared prefix of two keys, in bytes.
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

/// Convert flat entries to the wire format with prefix compression.
///
/// A leading `Tree` becomes the `l` pointer; a `Tree` following a `Leaf`
/// becomes that leaf's `t` pointer. Two adjacent `Tree` entries are invalid.
pub fn serialize_node_data<'a, S: BlockStore + Sync + 'static>(
    entries: &'a [NodeEntry<S>],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<NodeData>> + Send + 'a>> {
    Box::pin(async move {
        let mut data = NodeData {
            left: None,
            entries: Vec::new(),
        };

        let mut i = 0;
        if let Some(NodeEntry::Tree(tree)) = entries.first() {
            data.left = Some(tree.root().await?);
            i += 1;
        }

        let mut last_key = String::new();
        while i < entries.len() {
            let NodeEntry::Leaf { key, value } = &entries[i] else {
                return Err(RepoError::InvalidMst(
                    "two adjacent subtrees in flat entries".into(),
                ));
            };
            i += 1;

            let prefix_len = common_prefix_len(&last_key, key.as_str());
            let key_suffix = key.as_str()[prefix_len..].as_bytes().to_vec();

            let tree = if let Some(NodeEntry::Tree(tree)) = entries.get(i) {
                i += 1;
                Some(tree.root().await?)
            } else {
                None
            };

            data.entries.push(TreeEntry {
                key_suffix,
                prefix_len: prefix_len.try_into().map_err(|_| {
                    RepoError::InvalidMst(format!("prefix length {prefix_len} exceeds u8"))
                })?,
                tree,
                value: *value,
            });

            last_key = key.as_str().to_string();
        }

        Ok(data)
    })
}

/// Convert the wire format back to flat entries, reconstructing full keys.
pub fn deserialize_node_data<S: BlockStore + Sync + 'static>(
    storage: Arc<S>,
    data: &NodeData,
    layer: Option<usize>,
) -> Result<Vec<NodeEntry<S>>> {
    use crate::mst::Mst;

    let child_layer = layer.map(|l| l.saturating_sub(1));
    let mut entries = Vec::new();

    if let Some(left) = data.left {
        entries.push(NodeEntry::Tree(Mst::load(storage.clone(), left, child_layer)));
    }

    let mut last_key = String::new();
    for entry in &data.entries {
        let suffix = std::str::from_utf8(&entry.key_suffix)
            .map_err(|e| RepoError::InvalidMst(format!("invalid UTF-8 in key suffix: {e}")))?;
        let prefix_len = entry.prefix_len as usize;
        if prefix_len > last_key.len() {
            return Err(RepoError::InvalidMst(format!(
                "prefix length {prefix_len} exceeds previous key length {}",
                last_key.len()
            )));
        }
        let full_key = format!("{}{}", &last_key[..prefix_len], suffix);

        entries.push(NodeEntry::Leaf {
            key: smol_str::SmolStr::new(&full_key),
            value: entry.value,
        });
        last_key = full_key;

        if let Some(tree) = entry.tree {
            entries.push(NodeEntry::Tree(Mst::load(storage.clone(), tree, child_layer)));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_record_paths() {
        assert!(validate_key("app.bsky.feed.post/3jqf").is_ok());
        assert!(validate_key("com.example.thing/self").is_ok());
        assert!(validate_key("a").is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(257)).is_err());
        assert!(validate_key("key with spaces").is_err());
        assert!(validate_key("key@bad").is_err());
    }

    #[test]
    fn common_prefix() {
        assert_eq!(common_prefix_len("hello", "help"), 3);
        assert_eq!(common_prefix_len("abc", "abc"), 3);
        assert_eq!(common_prefix_len("abc", "xyz"), 0);
        assert_eq!(common_prefix_len("", "abc"), 0);
    }

    #[test]
    fn layer_is_deterministic() {
        let a = layer_for_key("app.bsky.feed.post/test");
        let b = layer_for_key("app.bsky.feed.post/test");
        assert_eq!(a, b);
        assert!(a < 128);
    }

    #[test]
    fn leading_zero_count() {
        assert_eq!(leading_zeros(&[0, 0, 0, 1]), 31);
        assert_eq!(leading_zeros(&[0xFF, 0, 0]), 0);
        assert_eq!(leading_zeros(&[0, 0x80]), 8);
        assert_eq!(leading_zeros(&[0, 0x01]), 15);
    }
}
