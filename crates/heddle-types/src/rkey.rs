//! Record keys

use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

static RKEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._:~-]{1,512}$").unwrap());

/// Record key, the final path segment of a record's URI
///
/// Most record keys are TIDs, but any string matching `[a-zA-Z0-9._:~-]{1,512}`
/// except `.` and `..` is allowed. See <https://atproto.com/specs/record-key>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RecordKey(SmolStr);

impl RecordKey {
    /// Parse and validate a record key.
    pub fn new(rkey: impl AsRef<str>) -> Result<Self, ParseError> {
        let rkey = rkey.as_ref();
        if rkey.is_empty() {
            Err(ParseError::empty("record key"))
        } else if rkey.len() > 512 {
            Err(ParseError::too_long("record key", rkey, 512))
        } else if rkey == "." || rkey == ".." {
            Err(ParseError::malformed("record key", rkey, "reserved"))
        } else if !RKEY_REGEX.is_match(rkey) {
            Err(ParseError::malformed("record key", rkey, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new(rkey)))
        }
    }

    /// Infallible constructor for strings known to be valid record keys.
    /// Panics on invalid input.
    pub fn raw(rkey: impl AsRef<str>) -> Self {
        Self::new(rkey).expect("valid record key")
    }

    /// The record key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RecordKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_rkeys() {
        assert!(RecordKey::new("3jqf").is_ok());
        assert!(RecordKey::new("3jzfcijpj2z2a").is_ok());
        assert!(RecordKey::new("self").is_ok());
        assert!(RecordKey::new("pre:fix~x").is_ok());
    }

    #[test]
    fn invalid_rkeys() {
        assert!(RecordKey::new("").is_err());
        assert!(RecordKey::new(".").is_err());
        assert!(RecordKey::new("..").is_err());
        assert!(RecordKey::new("has space").is_err());
        assert!(RecordKey::new("slash/ed").is_err());
        assert!(RecordKey::new("a".repeat(513)).is_err());
    }
}
