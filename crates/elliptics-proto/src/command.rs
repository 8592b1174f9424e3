//! Command codes, flag bitmasks and per-reply command headers.

use serde::{Deserialize, Serialize};

use crate::id::DnetId;

/// Wire command codes. The numeric values are part of the protocol and must
/// stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Command {
    Lookup = 1,
    Write = 4,
    Read = 5,
    Exec = 7,
    RouteList = 8,
    Stat = 9,
    Notify = 10,
    Remove = 11,
    StatCount = 12,
    Status = 13,
    ReadRange = 14,
    DelRange = 15,
    BulkRead = 17,
    Iterator = 19,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> crate::Result<Command> {
        Ok(match code {
            1 => Command::Lookup,
            4 => Command::Write,
            5 => Command::Read,
            7 => Command::Exec,
            8 => Command::RouteList,
            9 => Command::Stat,
            10 => Command::Notify,
            11 => Command::Remove,
            12 => Command::StatCount,
            13 => Command::Status,
            14 => Command::ReadRange,
            15 => Command::DelRange,
            17 => Command::BulkRead,
            19 => Command::Iterator,
            other => return Err(crate::ProtoError::BadCommand(other)),
        })
    }
}

/// Control flags carried in the `cflags` word of a transaction.
pub mod cflags {
    /// The transaction expects a terminal acknowledgement reply.
    pub const NEED_ACK: u64 = 1 << 0;
    /// More replies follow this one within the same transaction.
    pub const MORE: u64 = 1 << 1;
    /// Address the transaction to an explicit state, bypassing routing.
    pub const DIRECT: u64 = 1 << 3;
    /// Do not take the per-object server lock.
    pub const NOLOCK: u64 = 1 << 4;
}

/// Per-request flags carried in the `flags` word of an I/O attribute.
pub mod ioflags {
    pub const APPEND: u32 = 1 << 1;
    pub const META: u32 = 1 << 3;
    /// Reserve space ahead of a multi-part upload.
    pub const PREPARE: u32 = 1 << 4;
    /// Seal a multi-part upload.
    pub const COMMIT: u32 = 1 << 5;
    /// Write the bytes without touching object metadata.
    pub const PLAIN_WRITE: u32 = 1 << 9;
    /// Range requests: report key counts only, no payload.
    pub const NODATA: u32 = 1 << 10;
    /// Write into the server cache with a lifetime instead of the store.
    pub const CACHE: u32 = 1 << 11;
    /// Write only if the stored checksum matches `IoAttr::parent`.
    pub const COMPARE_AND_SWAP: u32 = 1 << 12;
}

/// Negative errno sentinels used as wire statuses.
pub mod status {
    pub const ENOENT: i32 = -2;
    pub const EIO: i32 = -5;
    pub const EAGAIN: i32 = -11;
    pub const EACCES: i32 = -13;
    pub const EINVAL: i32 = -22;
    pub const ETIMEDOUT: i32 = -110;
}

/// Header attached to every reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader {
    /// Id the replying node answered for (group set to the replying group).
    pub id: DnetId,
    /// Wire status: 0 on success, a negative errno otherwise.
    pub status: i32,
    pub cmd: Command,
    /// Control flag bits, see [`cflags`].
    pub flags: u64,
    /// Transaction number assigned by the transport.
    pub trans: u64,
    /// Payload size in bytes.
    pub size: u64,
}

impl CommandHeader {
    pub fn new(id: DnetId, cmd: Command) -> Self {
        CommandHeader {
            id,
            status: 0,
            cmd,
            flags: 0,
            trans: 0,
            size: 0,
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }
}
