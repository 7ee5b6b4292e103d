//! Commit-time versionstamps
//!
//! A versionstamp is a 10-byte identifier assigned by the KV when a
//! transaction commits: an 8-byte big-endian transaction version followed by
//! a 2-byte big-endian batch order. Stamps are strictly increasing across
//! commits, which makes versionstamped keys a total order over the firehose.
//!
//! Writes that want a stamp embedded in their key or value pass a *template*:
//! the payload with a 10-byte placeholder at some position, followed by a
//! 4-byte little-endian offset naming that position. The KV strips the offset
//! and fills the placeholder at commit time.

use crate::error::KvError;

/// Length of a versionstamp in bytes.
pub const VERSIONSTAMP_LEN: usize = 10;

/// A 10-byte commit-time stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp([u8; VERSIONSTAMP_LEN]);

impl Versionstamp {
    /// Build a stamp from a transaction version and batch order.
    pub fn from_parts(version: u64, batch: u16) -> Self {
        let mut bytes = [0u8; VERSIONSTAMP_LEN];
        bytes[..8].copy_from_slice(&version.to_be_bytes());
        bytes[8..].copy_from_slice(&batch.to_be_bytes());
        Self(bytes)
    }

    /// Parse a stamp from exactly 10 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KvError> {
        let arr: [u8; VERSIONSTAMP_LEN] = bytes
            .try_into()
            .map_err(|_| KvError::MalformedKey(format!("versionstamp of {} bytes", bytes.len())))?;
        Ok(Self(arr))
    }

    /// The raw stamp bytes.
    pub fn as_bytes(&self) -> &[u8; VERSIONSTAMP_LEN] {
        &self.0
    }

    /// The stamp's sequence number: the first 8 bytes as a big-endian i64.
    pub fn seq(&self) -> i64 {
        i64::from_be_bytes(self.0[..8].try_into().expect("8 bytes"))
    }

    /// An 8-byte cursor positioned at the given sequence number.
    ///
    /// Lexicographically this sorts before every 10-byte stamp sharing the
    /// same leading 8 bytes, so a strictly-after scan from this cursor yields
    /// all events with sequence >= `seq`.
    pub fn seq_cursor(seq: i64) -> Vec<u8> {
        seq.to_be_bytes().to_vec()
    }
}

/// Build a versionstamped-key template: `prefix ∥ placeholder ∥ offset`.
///
/// The stamp lands immediately after `prefix` in the committed key.
pub fn key_template(prefix: &[u8]) -> Vec<u8> {
    let mut template = Vec::with_capacity(prefix.len() + VERSIONSTAMP_LEN + 4);
    template.extend_from_slice(prefix);
    template.extend_from_slice(&[0u8; VERSIONSTAMP_LEN]);
    template.extend_from_slice(&(prefix.len() as u32).to_le_bytes());
    template
}

/// Build a versionstamped-value template holding nothing but the stamp.
pub fn value_template() -> Vec<u8> {
    key_template(&[])
}

/// Resolve a template against a committed stamp.
///
/// Strips the trailing 4-byte offset and overwrites the placeholder.
pub fn resolve_template(template: &[u8], stamp: &Versionstamp) -> Result<Vec<u8>, KvError> {
    if template.len() < VERSIONSTAMP_LEN + 4 {
        return Err(KvError::MalformedTemplate(format!(
            "{} bytes, need at least {}",
            template.len(),
            VERSIONSTAMP_LEN + 4
        )));
    }
    let (payload, offset_bytes) = template.split_at(template.len() - 4);
    let offset = u32::from_le_bytes(offset_bytes.try_into().expect("4 bytes")) as usize;
    if offset + VERSIONSTAMP_LEN > payload.len() {
        return Err(KvError::MalformedTemplate(format!(
            "offset {offset} outside payload of {} bytes",
            payload.len()
        )));
    }
    let mut resolved = payload.to_vec();
    resolved[offset..offset + VERSIONSTAMP_LEN].copy_from_slice(stamp.as_bytes());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_order_by_version_then_batch() {
        let a = Versionstamp::from_parts(1, 0);
        let b = Versionstamp::from_parts(1, 1);
        let c = Versionstamp::from_parts(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a.as_bytes()[..] < b.as_bytes()[..]);
    }

    #[test]
    fn seq_is_version() {
        let stamp = Versionstamp::from_parts(42, 7);
        assert_eq!(stamp.seq(), 42);
    }

    #[test]
    fn key_template_resolves_in_place() {
        let stamp = Versionstamp::from_parts(5, 0);
        let template = key_template(b"events/");
        let resolved = resolve_template(&template, &stamp).unwrap();
        assert_eq!(&resolved[..7], b"events/");
        assert_eq!(&resolved[7..], stamp.as_bytes());
    }

    #[test]
    fn seq_cursor_sorts_before_same_seq_stamps() {
        let cursor = Versionstamp::seq_cursor(5);
        let stamp = Versionstamp::from_parts(5, 0);
        assert!(cursor.as_slice() < &stamp.as_bytes()[..]);
        let earlier = Versionstamp::from_parts(4, u16::MAX);
        assert!(&earlier.as_bytes()[..] < cursor.as_slice());
    }

    #[test]
    fn rejects_bad_templates() {
        let stamp = Versionstamp::from_parts(1, 0);
        assert!(resolve_template(&[0u8; 5], &stamp).is_err());
        // Offset pointing past the payload.
        let mut template = key_template(b"x");
        let len = template.len();
        template[len - 4..].copy_from_slice(&100u32.to_le_bytes());
        assert!(resolve_template(&template, &stamp).is_err());
    }
}
