//! Named key subspaces
//!
//! Every logical index gets a statically registered, prefix-isolated
//! namespace. Subspace prefixes are themselves tuple-encoded, so no subspace
//! prefix can be a prefix of another's keys.

use crate::kv::KeyRange;
use crate::tuple::{self, Element};

/// A prefix-isolated key namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// A root-level subspace with the given directory name.
    pub fn new(name: &str) -> Self {
        Self {
            prefix: tuple::pack(&[Element::Str(name)]),
        }
    }

    /// The raw prefix bytes.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Pack a key under this subspace.
    pub fn pack(&self, elements: &[Element<'_>]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        tuple::pack_into(&mut key, elements);
        key
    }

    /// Decode the elements of a key under this subspace.
    ///
    /// Returns `None` when the key does not carry this subspace's prefix.
    pub fn unpack(&self, key: &[u8]) -> Option<Result<Vec<tuple::OwnedElement>, crate::KvError>> {
        key.strip_prefix(self.prefix.as_slice()).map(tuple::unpack)
    }

    /// The range covering every key in this subspace.
    pub fn range(&self) -> KeyRange {
        KeyRange {
            begin: self.prefix.clone(),
            end: tuple::prefix_end(&self.prefix),
        }
    }

    /// The range covering every key extending `elements` under this subspace.
    pub fn range_of(&self, elements: &[Element<'_>]) -> KeyRange {
        let begin = self.pack(elements);
        let end = tuple::prefix_end(&begin);
        KeyRange { begin, end }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subspaces_are_disjoint() {
        let a = Subspace::new("actors");
        let b = Subspace::new("actor"); // proper prefix of the name
        let key = a.pack(&[Element::Str("did:plc:x")]);
        assert!(b.unpack(&key).is_none());
        assert!(a.unpack(&key).is_some());
    }

    #[test]
    fn range_contains_only_own_keys() {
        let records = Subspace::new("records");
        let events = Subspace::new("events");
        let range = records.range();
        let inside = records.pack(&[Element::Str("did"), Element::Str("coll")]);
        let outside = events.pack(&[Element::Str("did")]);
        assert!(range.contains(&inside));
        assert!(!range.contains(&outside));
    }

    #[test]
    fn range_of_narrows_to_tuple_prefix() {
        let records = Subspace::new("records");
        let range = records.range_of(&[Element::Str("did"), Element::Str("coll")]);
        let inside = records.pack(&[
            Element::Str("did"),
            Element::Str("coll"),
            Element::Str("rkey"),
        ]);
        let other = records.pack(&[
            Element::Str("did"),
            Element::Str("collz"),
            Element::Str("rkey"),
        ]);
        assert!(range.contains(&inside));
        assert!(!range.contains(&other));
    }
}
