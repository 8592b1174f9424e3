//! The transport capability consumed by the request engine.
//!
//! The engine never owns sockets. It hands a [`TransactionControl`] to a
//! [`Transport`] and receives a stream of reply events: zero or more frames
//! followed by exactly one terminal status. Routing tables, group state
//! lists and connection pools all live behind this trait; the engine treats
//! them as immutable snapshots per call.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use elliptics_proto::{CommandHeader, DataBuffer, DnetId, RawId, TransactionControl};
use tokio::sync::mpsc;

use crate::error::Result;

/// One reply frame from a node.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    pub header: CommandHeader,
    /// Address of the replying node.
    pub addr: SocketAddr,
    pub payload: DataBuffer,
    /// More frames follow within this transaction; the frame with `more`
    /// unset is the transaction's terminal acknowledgement.
    pub more: bool,
}

/// Event stream produced by a dispatch.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    Reply(ReplyFrame),
    /// Terminal status of the whole transaction; delivered exactly once,
    /// strictly after the last frame.
    Final(i32),
}

/// Target selector for a status update.
#[derive(Debug, Clone)]
pub enum StatusTarget {
    Addr(SocketAddr),
    Id(DnetId),
}

/// Node status word settable through [`Transport::update_status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub nflags: u64,
    pub log_level: u32,
    pub status_flags: u64,
}

/// Wire primitives the engine consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one transaction and returns its reply event stream. `timeout`
    /// is the session wall-clock budget; on expiry the transport delivers a
    /// timeout status for every outstanding target.
    async fn dispatch(
        &self,
        ctl: TransactionControl,
        timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<ReplyEvent>>;

    /// Resolves the state currently serving `id` within its group.
    fn route(&self, id: &DnetId) -> Result<SocketAddr>;

    /// Ordered group preference list, optionally keyed by an id.
    fn mix_states(&self, id: Option<&RawId>) -> Vec<u32>;

    /// The covered sub-range `[start, next)` containing `id` within its
    /// group.
    fn search_range(&self, id: &DnetId) -> Result<(RawId, RawId)>;

    /// Human-readable address of the state serving `id`.
    fn lookup_addr(&self, id: &DnetId) -> Result<String>;

    /// Snapshot of the route table.
    fn get_routes(&self) -> Vec<(DnetId, SocketAddr)>;

    /// Pushes a node status update; returns the node's resulting status.
    async fn update_status(&self, target: StatusTarget, status: NodeStatus) -> Result<i32>;

    /// Registers a new state by address.
    async fn add_state(&self, addr: SocketAddr) -> Result<()>;

    /// Number of connected states.
    fn state_num(&self) -> usize;

    /// Addresses of every connected state, for broadcast-style requests.
    fn known_states(&self) -> Vec<SocketAddr>;
}
