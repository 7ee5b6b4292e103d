//! `at://` record URIs

use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::str::FromStr;

/// URI naming a single record: `at://<repo>/<collection>/<rkey>`
///
/// The scheme is optional when parsing. All three components must be
/// non-empty; component-level syntax is the concern of [`crate::Did`],
/// [`crate::Nsid`], and [`crate::RecordKey`] at the point where the
/// components are actually used.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AtUri {
    repo: SmolStr,
    collection: SmolStr,
    rkey: SmolStr,
}

impl AtUri {
    /// Assemble a URI from its components.
    ///
    /// Fails if any component is empty.
    pub fn new(
        repo: impl AsRef<str>,
        collection: impl AsRef<str>,
        rkey: impl AsRef<str>,
    ) -> Result<Self, ParseError> {
        let (repo, collection, rkey) = (repo.as_ref(), collection.as_ref(), rkey.as_ref());
        if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(ParseError::empty("at-uri component"));
        }
        Ok(Self {
            repo: SmolStr::new(repo),
            collection: SmolStr::new(collection),
            rkey: SmolStr::new(rkey),
        })
    }

    /// Parse an `at://` URI. The scheme prefix is optional.
    pub fn parse(uri: &str) -> Result<Self, ParseError> {
        if uri.is_empty() {
            return Err(ParseError::empty("at-uri"));
        }
        let rest = uri.strip_prefix("at://").unwrap_or(uri);
        let mut parts = rest.splitn(3, '/');
        let repo = parts.next().unwrap_or("");
        let collection = parts.next().unwrap_or("");
        let rkey = parts.next().unwrap_or("");
        if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(ParseError::malformed(
                "at-uri",
                uri,
                "expected at://repo/collection/rkey",
            ));
        }
        Self::new(repo, collection, rkey)
    }

    /// The repository component (a DID in this engine).
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The collection NSID component.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The record key component.
    pub fn rkey(&self) -> &str {
        &self.rkey
    }

    /// The MST path for this record: `"<collection>/<rkey>"`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.rkey)
    }
}

impl FromStr for AtUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.repo, self.collection, self.rkey)
    }
}

impl Serialize for AtUri {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AtUri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: &str = Deserialize::deserialize(deserializer)?;
        Self::parse(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_scheme() {
        let uri = AtUri::parse("at://did:plc:a1/app.test.post/3jqf").unwrap();
        assert_eq!(uri.repo(), "did:plc:a1");
        assert_eq!(uri.collection(), "app.test.post");
        assert_eq!(uri.rkey(), "3jqf");
        assert_eq!(uri.path(), "app.test.post/3jqf");
    }

    #[test]
    fn parse_without_scheme() {
        let uri = AtUri::parse("did:plc:a1/app.test.post/3jqf").unwrap();
        assert_eq!(uri.repo(), "did:plc:a1");
    }

    #[test]
    fn format_parse_roundtrip() {
        for (r, c, k) in [
            ("did:plc:a1", "app.test.post", "3jqf"),
            ("did:web:example.com", "com.example.thing", "self"),
            ("r", "c", "k"),
        ] {
            let uri = AtUri::new(r, c, k).unwrap();
            let parsed = AtUri::parse(&uri.to_string()).unwrap();
            assert_eq!((parsed.repo(), parsed.collection(), parsed.rkey()), (r, c, k));
        }
    }

    #[test]
    fn rejects_missing_components() {
        assert!(AtUri::parse("").is_err());
        assert!(AtUri::parse("at://did:plc:a1").is_err());
        assert!(AtUri::parse("at://did:plc:a1/app.test.post").is_err());
        assert!(AtUri::parse("at://did:plc:a1/app.test.post/").is_err());
        assert!(AtUri::parse("at:///app.test.post/3jqf").is_err());
    }
}
