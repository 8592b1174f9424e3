//! I/O attributes, file-info records and iterator requests.
//!
//! `IoAttr` rides in both directions: requests carry it to describe the
//! region being read or written, and range replies carry one back as the
//! per-range acknowledgement whose `num` field drives residual accounting.

use serde::{Deserialize, Serialize};

use crate::data::DataBuffer;
use crate::id::{RawId, ID_SIZE};
use crate::{ProtoError, Result};

/// Wire I/O attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoAttr {
    /// Parent id: the range end for ranged requests, the expected content
    /// checksum for compare-and-swap writes.
    pub parent: RawId,
    pub id: RawId,
    /// Ranged requests: number of leading keys to skip.
    pub start: u64,
    /// Ranged requests: residual number of keys wanted. Range replies: number
    /// of keys the sub-range produced.
    pub num: u64,
    pub offset: u64,
    pub size: u64,
    /// See [`crate::command::ioflags`].
    pub flags: u32,
    pub type_tag: i32,
}

impl IoAttr {
    /// Encoded width in bytes.
    pub const WIRE_SIZE: usize = ID_SIZE * 2 + 8 * 4 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        out.extend_from_slice(self.parent.as_bytes());
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(&self.start.to_le_bytes());
        out.extend_from_slice(&self.num.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.type_tag.to_le_bytes());
        out
    }

    pub fn decode(buf: &DataBuffer) -> Result<IoAttr> {
        let bytes = buf.as_slice();
        if bytes.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: bytes.len(),
            });
        }
        let parent = RawId::from_slice(&bytes[..ID_SIZE])?;
        let id = RawId::from_slice(&bytes[ID_SIZE..ID_SIZE * 2])?;
        let mut at = ID_SIZE * 2;
        let mut read_u64 = |bytes: &[u8]| {
            let v = u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
            at += 8;
            v
        };
        let start = read_u64(bytes);
        let num = read_u64(bytes);
        let offset = read_u64(bytes);
        let size = read_u64(bytes);
        let flags = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let type_tag = i32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        Ok(IoAttr {
            parent,
            id,
            start,
            num,
            offset,
            size,
            flags,
            type_tag,
        })
    }
}

/// File metadata returned by lookup and write acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub mtime_sec: u64,
    pub mtime_nsec: u64,
    pub size: u64,
    pub checksum: RawId,
    pub path: String,
}

impl FileInfo {
    /// Width of the fixed part, before the trailing path bytes. A lookup
    /// reply is valid-positive only when its payload is strictly larger.
    pub const FIXED_SIZE: usize = 8 * 3 + ID_SIZE + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE + self.path.len());
        out.extend_from_slice(&self.mtime_sec.to_le_bytes());
        out.extend_from_slice(&self.mtime_nsec.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(self.checksum.as_bytes());
        out.extend_from_slice(&(self.path.len() as u32).to_le_bytes());
        out.extend_from_slice(self.path.as_bytes());
        out
    }

    pub fn decode(buf: &DataBuffer) -> Result<FileInfo> {
        let bytes = buf.as_slice();
        if bytes.len() < Self::FIXED_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::FIXED_SIZE,
                got: bytes.len(),
            });
        }
        let mtime_sec = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let mtime_nsec = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let size = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let checksum = RawId::from_slice(&bytes[24..24 + ID_SIZE])?;
        let flen =
            u32::from_le_bytes(bytes[24 + ID_SIZE..Self::FIXED_SIZE].try_into().unwrap()) as usize;
        let rest = &bytes[Self::FIXED_SIZE..];
        if rest.len() < flen {
            return Err(ProtoError::Truncated {
                need: Self::FIXED_SIZE + flen,
                got: bytes.len(),
            });
        }
        let path = String::from_utf8(rest[..flen].to_vec())?;
        Ok(FileInfo {
            mtime_sec,
            mtime_nsec,
            size,
            checksum,
            path,
        })
    }
}

/// Request payload for a long-running keyspace iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IteratorRequest {
    pub flags: u64,
    pub key_begin: RawId,
    pub key_end: RawId,
}

impl IteratorRequest {
    pub const WIRE_SIZE: usize = 8 + ID_SIZE * 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(self.key_begin.as_bytes());
        out.extend_from_slice(self.key_end.as_bytes());
        out
    }

    pub fn decode(buf: &DataBuffer) -> Result<IteratorRequest> {
        let bytes = buf.as_slice();
        if bytes.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: bytes.len(),
            });
        }
        let flags = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let key_begin = RawId::from_slice(&bytes[8..8 + ID_SIZE])?;
        let key_end = RawId::from_slice(&bytes[8 + ID_SIZE..Self::WIRE_SIZE])?;
        Ok(IteratorRequest {
            flags,
            key_begin,
            key_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(b: u8) -> RawId {
        let mut bytes = [0u8; ID_SIZE];
        bytes[0] = b;
        RawId::new(bytes)
    }

    #[test]
    fn test_io_attr_round_trip() {
        let io = IoAttr {
            parent: raw(1),
            id: raw(2),
            start: 5,
            num: 20,
            offset: 100,
            size: 4096,
            flags: crate::command::ioflags::COMPARE_AND_SWAP,
            type_tag: -1,
        };
        let encoded = io.encode();
        assert_eq!(encoded.len(), IoAttr::WIRE_SIZE);
        let decoded = IoAttr::decode(&DataBuffer::from_vec(encoded)).unwrap();
        assert_eq!(decoded, io);
    }

    #[test]
    fn test_io_attr_truncated() {
        let io = IoAttr::default();
        let mut encoded = io.encode();
        encoded.pop();
        assert!(IoAttr::decode(&DataBuffer::from_vec(encoded)).is_err());
    }

    #[test]
    fn test_file_info_round_trip() {
        let info = FileInfo {
            mtime_sec: 100,
            mtime_nsec: 500,
            size: 11,
            checksum: raw(9),
            path: "/srv/data/2/blob-0001".to_string(),
        };
        let decoded = FileInfo::decode(&DataBuffer::from_vec(info.encode())).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_file_info_requires_full_path() {
        let info = FileInfo {
            mtime_sec: 1,
            mtime_nsec: 2,
            size: 3,
            checksum: raw(4),
            path: "abc".to_string(),
        };
        let mut encoded = info.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(FileInfo::decode(&DataBuffer::from_vec(encoded)).is_err());
    }

    #[test]
    fn test_iterator_request_round_trip() {
        let req = IteratorRequest {
            flags: 3,
            key_begin: raw(1),
            key_end: raw(255),
        };
        let decoded = IteratorRequest::decode(&DataBuffer::from_vec(req.encode())).unwrap();
        assert_eq!(decoded, req);
    }
}
