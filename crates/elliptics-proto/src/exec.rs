//! Framing for the server-side script invocation protocol.
//!
//! An exec context is a (header, event, payload) triple laid out contiguously
//! on the wire: a fixed header, then `event_size` bytes of event name, then
//! `data_size` bytes of payload. Internally the three parts are carried as
//! separate values; the packed layout exists only at the wire boundary.

use crate::data::DataBuffer;
use crate::id::{RawId, ID_SIZE};
use crate::{ProtoError, Result};

/// The server blocks until the script replies.
pub const SPH_FLAGS_SRC_BLOCK: u64 = 0x1;
/// This reply is the last one for the invocation.
pub const SPH_FLAGS_FINISH: u64 = 0x2;
/// The context is a reply travelling back to the invocation source.
pub const SPH_FLAGS_REPLY: u64 = 0x4;

/// Fixed-layout script header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SphHeader {
    /// Id of the node that originated the invocation; replies route here.
    pub src: RawId,
    pub flags: u64,
    pub event_size: u32,
    pub data_size: u64,
    pub status: i32,
    pub key: i32,
}

impl SphHeader {
    /// Encoded width in bytes.
    pub const WIRE_SIZE: usize = ID_SIZE + 8 + 4 + 8 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        out.extend_from_slice(self.src.as_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.event_size.to_le_bytes());
        out.extend_from_slice(&self.data_size.to_le_bytes());
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.key.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<SphHeader> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: bytes.len(),
            });
        }
        let src = RawId::from_slice(&bytes[..ID_SIZE])?;
        let at = ID_SIZE;
        let flags = u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
        let event_size = u32::from_le_bytes(bytes[at + 8..at + 12].try_into().unwrap());
        let data_size = u64::from_le_bytes(bytes[at + 12..at + 20].try_into().unwrap());
        let status = i32::from_le_bytes(bytes[at + 20..at + 24].try_into().unwrap());
        let key = i32::from_le_bytes(bytes[at + 24..at + 28].try_into().unwrap());
        Ok(SphHeader {
            src,
            flags,
            event_size,
            data_size,
            status,
            key,
        })
    }
}

/// Immutable carrier of one script invocation or reply.
///
/// Shared by value; construction fixes the content. `serialize` and `parse`
/// are exact inverses for any valid context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    header: SphHeader,
    event: String,
    data: DataBuffer,
}

impl ExecContext {
    /// Fresh context with a zeroed header.
    pub fn new(event: &str, data: DataBuffer) -> Self {
        let header = SphHeader {
            event_size: event.len() as u32,
            data_size: data.len() as u64,
            ..SphHeader::default()
        };
        ExecContext {
            header,
            event: event.to_string(),
            data,
        }
    }

    /// New context inheriting `other`'s flags, source id, status and key,
    /// carrying a new event and payload.
    pub fn copy(other: &ExecContext, event: &str, data: DataBuffer) -> Self {
        let header = SphHeader {
            event_size: event.len() as u32,
            data_size: data.len() as u64,
            ..other.header
        };
        ExecContext {
            header,
            event: event.to_string(),
            data,
        }
    }

    /// Parses a packed context, requiring the buffer length to agree exactly
    /// with `header + event_size + data_size`.
    pub fn parse(buf: &DataBuffer) -> Result<ExecContext> {
        let bytes = buf.as_slice();
        if bytes.len() < SphHeader::WIRE_SIZE {
            return Err(ProtoError::InvalidSize {
                expected: SphHeader::WIRE_SIZE,
                got: bytes.len(),
            });
        }
        let header = SphHeader::decode(bytes)?;
        let expected =
            SphHeader::WIRE_SIZE + header.event_size as usize + header.data_size as usize;
        if bytes.len() != expected {
            return Err(ProtoError::InvalidSize {
                expected,
                got: bytes.len(),
            });
        }
        let event_end = SphHeader::WIRE_SIZE + header.event_size as usize;
        let event = String::from_utf8(bytes[SphHeader::WIRE_SIZE..event_end].to_vec())?;
        let data = buf.skip(event_end);
        Ok(ExecContext {
            header,
            event,
            data,
        })
    }

    /// Packs the context into its contiguous wire form.
    pub fn serialize(&self) -> DataBuffer {
        let mut out = Vec::with_capacity(
            SphHeader::WIRE_SIZE + self.event.len() + self.data.len(),
        );
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(self.event.as_bytes());
        out.extend_from_slice(self.data.as_slice());
        DataBuffer::from_vec(out)
    }

    pub fn with_flags(mut self, flags: u64) -> Self {
        self.header.flags = flags;
        self
    }

    pub fn with_src(mut self, src: RawId) -> Self {
        self.header.src = src;
        self
    }

    pub fn header(&self) -> &SphHeader {
        &self.header
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn data(&self) -> &DataBuffer {
        &self.data
    }

    pub fn src(&self) -> RawId {
        self.header.src
    }

    pub fn flags(&self) -> u64 {
        self.header.flags
    }

    pub fn is_final(&self) -> bool {
        self.header.flags & SPH_FLAGS_FINISH != 0
    }

    pub fn is_reply(&self) -> bool {
        self.header.flags & SPH_FLAGS_REPLY != 0
    }

    pub fn is_blocking(&self) -> bool {
        self.header.flags & SPH_FLAGS_SRC_BLOCK != 0
    }
}
