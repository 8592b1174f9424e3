//! Reply entries delivered to result streams.
//!
//! Every entry shares one generic core: the command header, the address of
//! the replying node and the raw payload. Operation-specific entry types
//! wrap the core and expose the payload through typed accessors.

use std::net::SocketAddr;

use elliptics_proto::{CommandHeader, DataBuffer, ExecContext, FileInfo, IoAttr};

use crate::error::{Error, Result};

/// Generic reply core shared by every entry kind.
#[derive(Debug, Clone)]
pub struct ReplyData {
    pub header: CommandHeader,
    pub addr: SocketAddr,
    pub payload: DataBuffer,
}

impl ReplyData {
    pub fn new(header: CommandHeader, addr: SocketAddr, payload: DataBuffer) -> Self {
        ReplyData {
            header,
            addr,
            payload,
        }
    }

    pub fn status(&self) -> i32 {
        self.header.status
    }

    pub fn data(&self) -> &DataBuffer {
        &self.payload
    }

    /// A bare acknowledgement: no payload attached.
    pub fn is_ack(&self) -> bool {
        self.payload.is_empty()
    }

    /// Carries a payload; together with status 0 this is what counts as a
    /// successful reply for aggregation.
    pub fn is_valid(&self) -> bool {
        !self.payload.is_empty()
    }
}

/// Common access to the generic reply core.
pub trait Entry: Clone + Send + Sync + From<ReplyData> + 'static {
    fn reply(&self) -> &ReplyData;

    fn status(&self) -> i32 {
        self.reply().status()
    }

    fn command(&self) -> &CommandHeader {
        &self.reply().header
    }

    fn address(&self) -> SocketAddr {
        self.reply().addr
    }
}

macro_rules! entry_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name(ReplyData);

        impl From<ReplyData> for $name {
            fn from(reply: ReplyData) -> Self {
                $name(reply)
            }
        }

        impl Entry for $name {
            fn reply(&self) -> &ReplyData {
                &self.0
            }
        }
    };
}

entry_type!(
    /// Reply to an operation with no specialized payload (remove, raw
    /// commands).
    GenericEntry
);

entry_type!(
    /// Read reply: an I/O attribute echo followed by the file bytes.
    ReadEntry
);

entry_type!(
    /// Lookup reply carrying a file-info record.
    LookupEntry
);

entry_type!(
    /// Write acknowledgement, lookup-shaped: carries the written replica's
    /// file-info record.
    WriteEntry
);

entry_type!(
    /// Exec reply embedding a framed script context.
    ExecEntry
);

entry_type!(
    /// One chunk of a long-running iterator.
    IteratorEntry
);

entry_type!(
    /// Per-state statistics reply.
    StatEntry
);

impl ReadEntry {
    /// The echoed I/O attribute at the head of the payload.
    pub fn io_attr(&self) -> Result<IoAttr> {
        IoAttr::decode(&self.0.payload).map_err(|e| Error::invalid_argument(e.to_string()))
    }

    /// The file bytes past the I/O attribute prefix.
    pub fn file(&self) -> DataBuffer {
        self.0.payload.skip(IoAttr::WIRE_SIZE)
    }
}

impl LookupEntry {
    pub fn file_info(&self) -> Result<FileInfo> {
        FileInfo::decode(&self.0.payload).map_err(|e| Error::invalid_argument(e.to_string()))
    }

    /// A lookup is valid-positive only when the payload is strictly larger
    /// than the fixed file-info part.
    pub fn has_file_info(&self) -> bool {
        self.0.status() == 0 && self.0.payload.len() > FileInfo::FIXED_SIZE
    }
}

impl WriteEntry {
    pub fn file_info(&self) -> Result<FileInfo> {
        FileInfo::decode(&self.0.payload).map_err(|e| Error::invalid_argument(e.to_string()))
    }
}

impl ExecEntry {
    pub fn context(&self) -> Result<ExecContext> {
        ExecContext::parse(&self.0.payload).map_err(|e| Error::invalid_argument(e.to_string()))
    }
}

impl IteratorEntry {
    pub fn io_attr(&self) -> Result<IoAttr> {
        IoAttr::decode(&self.0.payload).map_err(|e| Error::invalid_argument(e.to_string()))
    }

    pub fn chunk(&self) -> DataBuffer {
        self.0.payload.skip(IoAttr::WIRE_SIZE)
    }
}

impl StatEntry {
    pub fn counters(&self) -> &DataBuffer {
        &self.0.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elliptics_proto::{Command, DnetId, RawId};

    fn reply(status: i32, payload: Vec<u8>) -> ReplyData {
        let header =
            CommandHeader::new(DnetId::new(RawId::ZERO, 1), Command::Read).with_status(status);
        ReplyData::new(header, "127.0.0.1:1026".parse().unwrap(), payload.into())
    }

    #[test]
    fn test_ack_and_valid() {
        assert!(reply(0, vec![]).is_ack());
        assert!(!reply(0, vec![]).is_valid());
        assert!(reply(0, vec![1]).is_valid());
        assert!(!reply(-2, vec![1]).is_ack());
    }

    #[test]
    fn test_read_entry_splits_payload() {
        let io = IoAttr {
            size: 5,
            ..IoAttr::default()
        };
        let mut payload = io.encode();
        payload.extend_from_slice(b"hello");
        let entry = ReadEntry::from(reply(0, payload));
        assert_eq!(entry.io_attr().unwrap().size, 5);
        assert_eq!(entry.file().as_slice(), b"hello");
    }

    #[test]
    fn test_lookup_entry_file_info() {
        let info = FileInfo {
            mtime_sec: 10,
            mtime_nsec: 20,
            size: 30,
            checksum: RawId::ZERO,
            path: "/blob".into(),
        };
        let entry = LookupEntry::from(reply(0, info.encode()));
        assert!(entry.has_file_info());
        assert_eq!(entry.file_info().unwrap(), info);

        let ack = LookupEntry::from(reply(0, vec![]));
        assert!(!ack.has_file_info());
        assert!(ack.file_info().is_err());
    }

    #[test]
    fn test_exec_entry_context() {
        let ctx = ExecContext::new("event", DataBuffer::from_vec(vec![1, 2]));
        let entry = ExecEntry::from(reply(0, ctx.serialize().to_vec()));
        assert_eq!(entry.context().unwrap(), ctx);
    }

    #[test]
    fn test_entry_trait_accessors() {
        let entry = GenericEntry::from(reply(-2, vec![]));
        assert_eq!(entry.status(), -2);
        assert_eq!(entry.command().cmd, Command::Read);
        assert_eq!(entry.address().port(), 1026);
    }
}
