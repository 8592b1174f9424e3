//! Wire-ready transaction descriptors.

use std::net::SocketAddr;

use crate::command::Command;
use crate::data::DataBuffer;
use crate::id::DnetId;
use crate::io::IoAttr;

/// Packed descriptor for one wire transaction: what to run, where, and with
/// which payload. Built by the session, consumed by the transport.
#[derive(Debug, Clone)]
pub struct TransactionControl {
    pub id: DnetId,
    pub cmd: Command,
    /// Control flag bits, see [`crate::command::cflags`].
    pub cflags: u64,
    pub io: Option<IoAttr>,
    pub payload: DataBuffer,
    /// When set, the transaction is sent to this state directly instead of
    /// being routed by id (broadcast-style requests).
    pub direct: Option<SocketAddr>,
}

impl TransactionControl {
    pub fn new(id: DnetId, cmd: Command) -> Self {
        TransactionControl {
            id,
            cmd,
            cflags: 0,
            io: None,
            payload: DataBuffer::empty(),
            direct: None,
        }
    }

    pub fn with_cflags(mut self, cflags: u64) -> Self {
        self.cflags = cflags;
        self
    }

    pub fn with_io(mut self, io: IoAttr) -> Self {
        self.io = Some(io);
        self
    }

    pub fn with_payload(mut self, payload: DataBuffer) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_direct(mut self, addr: SocketAddr) -> Self {
        self.direct = Some(addr);
        self
    }
}
