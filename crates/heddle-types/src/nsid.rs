//! Namespaced identifiers for record collections

use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

static NSID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+\.[a-zA-Z]([a-zA-Z0-9]{0,62})?$",
    )
    .unwrap()
});

/// Namespaced identifier (NSID) naming a record collection
///
/// Reverse-domain authority plus a name segment, e.g. `app.bsky.feed.post`.
/// See <https://atproto.com/specs/nsid>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Nsid(SmolStr);

impl Nsid {
    /// Parse and validate an NSID.
    pub fn new(nsid: impl AsRef<str>) -> Result<Self, ParseError> {
        let nsid = nsid.as_ref();
        if nsid.is_empty() {
            Err(ParseError::empty("nsid"))
        } else if nsid.len() > 317 {
            Err(ParseError::too_long("nsid", nsid, 317))
        } else if !NSID_REGEX.is_match(nsid) {
            Err(ParseError::malformed("nsid", nsid, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new(nsid)))
        }
    }

    /// Infallible constructor for strings known to be valid NSIDs.
    /// Panics on invalid input.
    pub fn raw(nsid: impl AsRef<str>) -> Self {
        Self::new(nsid).expect("valid NSID")
    }

    /// The NSID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Nsid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Nsid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nsid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Nsid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_nsids() {
        assert!(Nsid::new("app.bsky.feed.post").is_ok());
        assert!(Nsid::new("app.test.post").is_ok());
        assert!(Nsid::new("com.example.fooBar").is_ok());
    }

    #[test]
    fn invalid_nsids() {
        assert!(Nsid::new("").is_err());
        assert!(Nsid::new("post").is_err());
        assert!(Nsid::new("app.bsky").is_err()); // needs at least three segments
        assert!(Nsid::new("app..post").is_err());
        assert!(Nsid::new("app.bsky.feed.post!").is_err());
    }
}
