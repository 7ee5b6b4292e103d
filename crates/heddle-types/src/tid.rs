//! Timestamp identifiers and the monotonic revision clock

use crate::error::ParseError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::SystemTime;

const S32_CHARS: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Mask keeping the 53 timestamp bits of a packed TID.
const TIMESTAMP_MASK: u64 = 0x001F_FFFF_FFFF_FFFF;

static TID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[234567abcdefghij][234567abcdefghijklmnopqrstuvwxyz]{12}$").unwrap()
});

fn s32_encode(value: u64) -> SmolStr {
    let mut buf = [0u8; 13];
    let mut v = value;
    for slot in buf.iter_mut().rev() {
        *slot = S32_CHARS[(v & 0x1F) as usize];
        v >>= 5;
    }
    SmolStr::new(std::str::from_utf8(&buf).expect("s32 alphabet is ASCII"))
}

fn s32_decode(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, b| {
        let digit = S32_CHARS
            .iter()
            .position(|&c| c == b)
            .expect("validated TID characters") as u64;
        (acc << 5) | digit
    })
}

/// Timestamp identifier (TID)
///
/// A 64-bit value rendered as 13 base32-sortable characters: 53 bits of
/// microseconds since the UNIX epoch followed by 10 bits of clock id.
/// Lexicographic order over the rendering equals numeric order over the
/// packed value, which makes TIDs usable both as record keys and as
/// per-actor commit revisions. See <https://atproto.com/specs/tid>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parse and validate a TID string.
    pub fn new(tid: impl AsRef<str>) -> Result<Self, ParseError> {
        let tid = tid.as_ref();
        if tid.len() != 13 {
            Err(ParseError::malformed("tid", tid, "must be 13 characters"))
        } else if !TID_REGEX.is_match(tid) {
            Err(ParseError::malformed("tid", tid, "didn't match schema"))
        } else {
            Ok(Self(SmolStr::new_inline(tid)))
        }
    }

    /// Infallible constructor for strings known to be valid TIDs.
    /// Panics on invalid input.
    pub fn raw(tid: impl AsRef<str>) -> Self {
        Self::new(tid).expect("valid TID")
    }

    /// Render a packed 64-bit TID value.
    ///
    /// The high bit must be clear; the remaining 63 bits are
    /// `timestamp_us << 10 | clock_id`.
    pub fn from_u64(value: u64) -> Self {
        debug_assert_eq!(value >> 63, 0, "TID values use 63 bits");
        Self(s32_encode(value))
    }

    /// Recover the packed 64-bit value.
    pub fn to_u64(&self) -> u64 {
        s32_decode(&self.0)
    }

    /// The timestamp component in microseconds since the UNIX epoch.
    pub fn timestamp_us(&self) -> u64 {
        self.to_u64() >> 10
    }

    /// The TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: &str = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Tid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

/// Candidate packed TID value for the current wall clock with clock id 0.
///
/// Microseconds since the UNIX epoch masked to 53 bits, shifted left to leave
/// the 10 clock-id bits clear. Callers coordinating through external state
/// (e.g. a per-actor KV row) compare this against the last issued value.
pub fn candidate_now() -> u64 {
    let now_us = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("clock after UNIX epoch")
        .as_micros() as u64;
    (now_us & TIMESTAMP_MASK) << 10
}

/// Monotonic TID generator anchored at a prior revision
///
/// Candidates are derived from the wall clock; if the clock has not advanced
/// past the last issued value the clock bumps by one instead, so successive
/// `next()` calls are strictly increasing even within one microsecond.
///
/// One clock is reconstructed per repository mutation, anchored at the rev of
/// the loaded commit, which serializes revisions through the commit chain.
#[derive(Debug, Clone, Default)]
pub struct TidClock {
    last: u64,
}

impl TidClock {
    /// Clock starting from zero (used when initializing a repository).
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Clock anchored at an existing revision: every value issued afterwards
    /// sorts strictly after `rev`.
    pub fn anchored(rev: &Tid) -> Self {
        Self { last: rev.to_u64() }
    }

    /// Issue the next revision.
    pub fn next(&mut self) -> Tid {
        let candidate = candidate_now();
        self.last = if candidate > self.last {
            candidate
        } else {
            self.last + 1
        };
        Tid::from_u64(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tids() {
        assert!(Tid::new("3jzfcijpj2z2a").is_ok());
        assert!(Tid::new("2222222222222").is_ok());
    }

    #[test]
    fn exact_length() {
        assert!(Tid::new("3jzfcijpj2z2").is_err()); // 12 chars
        assert!(Tid::new("3jzfcijpj2z2aa").is_err()); // 14 chars
    }

    #[test]
    fn first_char_constraint() {
        assert!(Tid::new("j222222222222").is_ok());
        assert!(Tid::new("k222222222222").is_err());
        assert!(Tid::new("z222222222222").is_err());
    }

    #[test]
    fn disallowed_characters() {
        assert!(Tid::new("3jzfcijpj2z2A").is_err()); // uppercase
        assert!(Tid::new("3jzfcijpj2z21").is_err()); // 1 not in alphabet
        assert!(Tid::new("3jzfcijpj2z28").is_err()); // 8 not in alphabet
    }

    #[test]
    fn u64_roundtrip() {
        for value in [0u64, 1, 1 << 10, ((1 << 53) - 1) << 10, u64::MAX >> 1] {
            assert_eq!(Tid::from_u64(value).to_u64(), value);
        }
    }

    #[test]
    fn lexicographic_order_is_numeric_order() {
        let a = Tid::from_u64(41 << 10);
        let b = Tid::from_u64(42 << 10);
        let c = Tid::from_u64((42 << 10) + 1);
        assert!(a.as_str() < b.as_str());
        assert!(b.as_str() < c.as_str());
    }

    #[test]
    fn clock_strictly_increases() {
        let mut clock = TidClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn anchored_clock_sorts_after_anchor() {
        let anchor = Tid::from_u64(1 << 62); // far future
        let mut clock = TidClock::anchored(&anchor);
        let next = clock.next();
        assert!(next > anchor);
    }

    #[test]
    fn rendering_is_13_chars() {
        let tid = TidClock::new().next();
        assert_eq!(tid.as_str().len(), 13);
        assert!(Tid::new(tid.as_str()).is_ok());
    }
}
