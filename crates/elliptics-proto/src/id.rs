//! Raw and group-scoped object identifiers.
//!
//! An object id is an opaque 64-byte string (the width of a SHA-512 digest).
//! Ordering is lexicographic over the raw bytes; that order drives range
//! traversal and bulk-request deduplication.

use std::cmp::Ordering;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of a raw object id in bytes.
pub const ID_SIZE: usize = 64;

/// Fixed-width opaque object identifier.
///
/// Equality is bytewise; `Ord` is the total lexicographic order over the raw
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawId([u8; ID_SIZE]);

impl RawId {
    /// The all-zero id.
    pub const ZERO: RawId = RawId([0u8; ID_SIZE]);

    pub fn new(bytes: [u8; ID_SIZE]) -> Self {
        RawId(bytes)
    }

    /// Builds an id from a slice, failing unless it is exactly [`ID_SIZE`]
    /// bytes long.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != ID_SIZE {
            return Err(crate::ProtoError::InvalidSize {
                expected: ID_SIZE,
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; ID_SIZE];
        raw.copy_from_slice(bytes);
        Ok(RawId(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Full lowercase hex rendering of the id.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(ID_SIZE * 2);
        for b in self.0.iter() {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    /// Hex rendering of the first `n` bytes, the form used in error messages
    /// and logs.
    pub fn hex_prefix(&self, n: usize) -> String {
        let n = n.min(ID_SIZE);
        let mut out = String::with_capacity(n * 2);
        for b in self.0[..n].iter() {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl Default for RawId {
    fn default() -> Self {
        RawId::ZERO
    }
}

impl Ord for RawId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for RawId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawId({}..)", self.hex_prefix(6))
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex_prefix(6))
    }
}

impl Serialize for RawId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RawId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() != ID_SIZE * 2 {
            return Err(D::Error::custom("raw id must be 128 hex characters"));
        }
        let mut raw = [0u8; ID_SIZE];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_nibble(chunk[0]).ok_or_else(|| D::Error::custom("bad hex digit"))?;
            let lo = hex_nibble(chunk[1]).ok_or_else(|| D::Error::custom("bad hex digit"))?;
            raw[i] = (hi << 4) | lo;
        }
        Ok(RawId(raw))
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Group-scoped identifier: a raw id addressed to one replication group,
/// with a type tag selecting a column within the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnetId {
    pub id: RawId,
    pub group: u32,
    pub type_tag: i32,
}

impl DnetId {
    pub fn new(id: RawId, group: u32) -> Self {
        DnetId {
            id,
            group,
            type_tag: 0,
        }
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn with_type(mut self, type_tag: i32) -> Self {
        self.type_tag = type_tag;
        self
    }
}

impl fmt::Display for DnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.group)
    }
}
