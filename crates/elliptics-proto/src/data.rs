//! Reference-counted, slicable byte buffers.
//!
//! Replies can be split across many frames and sliced by several consumers
//! (a read reply carries an io-attr prefix followed by file bytes, an exec
//! reply embeds a whole framed context). `DataBuffer` keeps one allocation
//! alive behind an `Arc` and hands out cheap offset/length views into it.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A cheaply clonable view over a contiguous byte region.
///
/// Cloning and slicing never copy; the underlying allocation is shared and
/// lives until the last view is dropped.
#[derive(Clone)]
pub struct DataBuffer {
    data: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl Default for DataBuffer {
    fn default() -> Self {
        DataBuffer {
            data: Arc::from(Vec::new()),
            offset: 0,
            len: 0,
        }
    }
}

impl DataBuffer {
    /// An empty buffer backed by no allocation.
    pub fn empty() -> Self {
        DataBuffer::default()
    }

    /// Takes ownership of a vector without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        DataBuffer {
            data: data.into(),
            offset: 0,
            len,
        }
    }

    /// Copies a slice into a fresh owned buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        DataBuffer::from_vec(data.to_vec())
    }

    /// Allocates a zeroed buffer of `len` bytes.
    pub fn allocate(len: usize) -> Self {
        DataBuffer::from_vec(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Advances the view past the first `n` bytes, clamping at the end.
    /// The underlying allocation is preserved.
    pub fn skip(&self, n: usize) -> DataBuffer {
        let n = n.min(self.len);
        DataBuffer {
            data: Arc::clone(&self.data),
            offset: self.offset + n,
            len: self.len - n,
        }
    }

    /// Sub-view over `range` (relative to this view), clamping at the end.
    pub fn slice(&self, range: Range<usize>) -> DataBuffer {
        let start = range.start.min(self.len);
        let end = range.end.min(self.len).max(start);
        DataBuffer {
            data: Arc::clone(&self.data),
            offset: self.offset + start,
            len: end - start,
        }
    }

    /// Reads a little-endian `u32` at `at`, if in bounds.
    pub fn read_u32_le(&self, at: usize) -> Option<u32> {
        let b = self.as_slice().get(at..at + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u64` at `at`, if in bounds.
    pub fn read_u64_le(&self, at: usize) -> Option<u64> {
        let b = self.as_slice().get(at..at + 8)?;
        Some(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// True when both views cover the same region of the same allocation.
    /// Two empty buffers always compare equal here.
    pub fn same_region(&self, other: &DataBuffer) -> bool {
        if self.is_empty() && other.is_empty() {
            return true;
        }
        Arc::ptr_eq(&self.data, &other.data)
            && self.offset == other.offset
            && self.len == other.len
    }
}

impl PartialEq for DataBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for DataBuffer {}

// Keep Debug small: long payloads would otherwise flood logs.
impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataBuffer(len={})", self.len)
    }
}

impl From<Vec<u8>> for DataBuffer {
    fn from(v: Vec<u8>) -> Self {
        DataBuffer::from_vec(v)
    }
}

impl From<&[u8]> for DataBuffer {
    fn from(v: &[u8]) -> Self {
        DataBuffer::copy_from(v)
    }
}

impl From<&str> for DataBuffer {
    fn from(v: &str) -> Self {
        DataBuffer::copy_from(v.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let b = DataBuffer::empty();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);
        assert_eq!(b.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn test_skip_preserves_allocation() {
        let b = DataBuffer::from_vec(vec![1, 2, 3, 4, 5]);
        let tail = b.skip(2);
        assert_eq!(tail.as_slice(), &[3, 4, 5]);
        assert!(Arc::ptr_eq(&b.data, &tail.data));
        // Clamped past the end.
        assert!(b.skip(100).is_empty());
    }

    #[test]
    fn test_slice() {
        let b = DataBuffer::from_vec(vec![10, 20, 30, 40]);
        assert_eq!(b.slice(1..3).as_slice(), &[20, 30]);
        assert_eq!(b.slice(3..100).as_slice(), &[40]);
        assert!(b.slice(4..4).is_empty());
        // Slices of slices stay anchored to the same allocation.
        let inner = b.slice(1..4).slice(1..2);
        assert_eq!(inner.as_slice(), &[30]);
    }

    #[test]
    fn test_typed_reads() {
        let mut v = 7u32.to_le_bytes().to_vec();
        v.extend_from_slice(&99u64.to_le_bytes());
        let b = DataBuffer::from_vec(v);
        assert_eq!(b.read_u32_le(0), Some(7));
        assert_eq!(b.read_u64_le(4), Some(99));
        assert_eq!(b.read_u64_le(5), None);
    }

    #[test]
    fn test_same_region() {
        let b = DataBuffer::from_vec(vec![1, 2, 3]);
        let c = b.clone();
        assert!(b.same_region(&c));
        assert!(!b.same_region(&b.skip(1)));
        // Equal content in a different allocation is not the same region.
        let d = DataBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(b, d);
        assert!(!b.same_region(&d));
        assert!(DataBuffer::empty().same_region(&DataBuffer::empty()));
    }
}
