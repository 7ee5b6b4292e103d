//! Decentralized identifiers

use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

/// Regex for DID validation per AT Protocol spec.
///
/// Allows `%` inside the identifier but rejects DIDs ending with `:` or `%`.
/// Well-formedness of percent-encoding is not checked, matching the reference
/// implementations.
static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

/// Decentralized identifier (`did:method:identifier`)
///
/// The globally unique primary key of an actor. See
/// <https://atproto.com/specs/did>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Parse and validate a DID.
    pub fn new(did: impl AsRef<str>) -> Result<Self, ParseError> {
        let did = did.as_ref();
        if did.is_empty() {
            Err(ParseError::empty("did"))
        } else if did.len() > 2048 {
            Err(ParseError::too_long("did", did, 2048))
        } else if !DID_REGEX.is_match(did) {
            Err(ParseError::malformed("did", did, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// Infallible constructor for strings known to be valid DIDs.
    /// Panics on invalid input.
    pub fn raw(did: impl AsRef<str>) -> Self {
        Self::new(did).expect("valid DID")
    }

    /// The DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
