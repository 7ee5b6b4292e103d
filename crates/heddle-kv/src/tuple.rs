//! Order-preserving tuple encoding for keys
//!
//! Keys are built by packing typed elements into byte strings whose
//! lexicographic order matches element-wise order. Two element types cover
//! every index in the engine: UTF-8 strings and raw byte strings. NUL bytes
//! inside an element are escaped as `0x00 0xFF` so the `0x00` terminator
//! stays unambiguous.

use crate::error::KvError;

/// Type code for a byte-string element.
const BYTES_CODE: u8 = 0x01;
/// Type code for a UTF-8 string element.
const STRING_CODE: u8 = 0x02;

/// A borrowed element to pack into a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element<'a> {
    /// Raw byte string (e.g. CID bytes)
    Bytes(&'a [u8]),
    /// UTF-8 string (identifiers, hostnames)
    Str(&'a str),
}

/// An element decoded from a packed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedElement {
    /// Raw byte string
    Bytes(Vec<u8>),
    /// UTF-8 string
    Str(String),
}

impl OwnedElement {
    /// The element as a string slice, if it is a string element.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OwnedElement::Str(s) => Some(s),
            OwnedElement::Bytes(_) => None,
        }
    }

    /// The element as a byte slice, if it is a bytes element.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OwnedElement::Bytes(b) => Some(b),
            OwnedElement::Str(_) => None,
        }
    }
}

fn encode_escaped(buf: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        buf.push(b);
        if b == 0x00 {
            buf.push(0xFF);
        }
    }
    buf.push(0x00);
}

/// Pack elements into an ordered key, appending to `buf`.
pub fn pack_into(buf: &mut Vec<u8>, elements: &[Element<'_>]) {
    for element in elements {
        match element {
            Element::Bytes(data) => {
                buf.push(BYTES_CODE);
                encode_escaped(buf, data);
            }
            Element::Str(s) => {
                buf.push(STRING_CODE);
                encode_escaped(buf, s.as_bytes());
            }
        }
    }
}

/// Pack elements into an ordered key.
pub fn pack(elements: &[Element<'_>]) -> Vec<u8> {
    let mut buf = Vec::new();
    pack_into(&mut buf, elements);
    buf
}

fn decode_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize), KvError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x00 if bytes.get(i + 1) == Some(&0xFF) => {
                out.push(0x00);
                i += 2;
            }
            0x00 => return Ok((out, i + 1)),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(KvError::MalformedKey("unterminated element".into()))
}

/// Unpack a key produced by [`pack`].
pub fn unpack(mut bytes: &[u8]) -> Result<Vec<OwnedElement>, KvError> {
    let mut elements = Vec::new();
    while let Some((&code, rest)) = bytes.split_first() {
        let (data, consumed) = decode_escaped(rest)?;
        match code {
            BYTES_CODE => elements.push(OwnedElement::Bytes(data)),
            STRING_CODE => {
                let s = String::from_utf8(data)
                    .map_err(|e| KvError::MalformedKey(format!("invalid UTF-8: {e}")))?;
                elements.push(OwnedElement::Str(s));
            }
            other => {
                return Err(KvError::MalformedKey(format!(
                    "unknown element code 0x{other:02x}"
                )));
            }
        }
        bytes = &rest[consumed..];
    }
    Ok(elements)
}

/// The key immediately after `key` in lexicographic order.
///
/// Scanning from here is "strictly after `key`".
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0x00);
    next
}

/// First key lexicographically after every key prefixed by `prefix`.
///
/// Panics when the prefix is all `0xFF` bytes, which no tuple-packed prefix
/// can be.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xFF {
            end.pop();
        } else {
            *end.last_mut().expect("nonempty") = last + 1;
            return end;
        }
    }
    panic!("prefix has no upper bound");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = pack(&[
            Element::Str("did:plc:a1"),
            Element::Str("app.test.post"),
            Element::Bytes(&[0x01, 0x00, 0xFF]),
        ]);
        let elements = unpack(&key).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].as_str(), Some("did:plc:a1"));
        assert_eq!(elements[1].as_str(), Some("app.test.post"));
        assert_eq!(elements[2].as_bytes(), Some(&[0x01, 0x00, 0xFF][..]));
    }

    #[test]
    fn order_preserved() {
        let a = pack(&[Element::Str("a")]);
        let ab = pack(&[Element::Str("a"), Element::Str("b")]);
        let b = pack(&[Element::Str("b")]);
        assert!(a < ab);
        assert!(ab < b);
    }

    #[test]
    fn nul_bytes_order_correctly() {
        // An embedded NUL must not terminate the element early.
        let with_nul = pack(&[Element::Bytes(&[0x01, 0x00, 0x02])]);
        let without = pack(&[Element::Bytes(&[0x01, 0x01])]);
        assert!(with_nul < without);
        assert_eq!(
            unpack(&with_nul).unwrap()[0].as_bytes(),
            Some(&[0x01, 0x00, 0x02][..])
        );
    }

    #[test]
    fn key_after_is_immediate_successor() {
        let key = pack(&[Element::Str("k")]);
        let after = key_after(&key);
        assert!(after > key);
        // Nothing fits between key and after.
        assert_eq!(after.len(), key.len() + 1);
        assert_eq!(*after.last().unwrap(), 0x00);
    }

    #[test]
    fn prefix_end_bounds_extensions() {
        let prefix = pack(&[Element::Str("records")]);
        let end = prefix_end(&prefix);
        let inner = pack(&[Element::Str("records"), Element::Str("zzz")]);
        assert!(prefix < inner);
        assert!(inner < end);
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(unpack(&[0x99, 0x00]).is_err());
        assert!(unpack(&[0x02, b'a']).is_err()); // unterminated
    }
}
