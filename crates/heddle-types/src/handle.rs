//! Actor handles

use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

static HANDLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$")
        .unwrap()
});

/// Human-readable actor alias, a hostname-shaped dotted name
///
/// Handles are globally unique at any point in time but may be reassigned.
/// See <https://atproto.com/specs/handle>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    /// Parse and validate a handle.
    pub fn new(handle: impl AsRef<str>) -> Result<Self, ParseError> {
        let handle = handle.as_ref();
        if handle.is_empty() {
            Err(ParseError::empty("handle"))
        } else if handle.len() > 253 {
            Err(ParseError::too_long("handle", handle, 253))
        } else if !HANDLE_REGEX.is_match(handle) {
            Err(ParseError::malformed("handle", handle, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new(handle.to_ascii_lowercase())))
        }
    }

    /// Infallible constructor for strings known to be valid handles.
    /// Panics on invalid input.
    pub fn raw(handle: impl AsRef<str>) -> Self {
        Self::new(handle).expect("valid handle")
    }

    /// The handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Handle {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_handles() {
        assert!(Handle::new("a.example").is_ok());
        assert!(Handle::new("alice.bsky.social").is_ok());
        assert!(Handle::new("xn--ls8h.example.com").is_ok());
    }

    #[test]
    fn normalizes_case() {
        assert_eq!(Handle::raw("Alice.Example.COM").as_str(), "alice.example.com");
    }

    #[test]
    fn invalid_handles() {
        assert!(Handle::new("").is_err());
        assert!(Handle::new("alice").is_err()); // no TLD
        assert!(Handle::new(".example").is_err());
        assert!(Handle::new("alice.example.").is_err());
        assert!(Handle::new("al ice.example").is_err());
    }
}
