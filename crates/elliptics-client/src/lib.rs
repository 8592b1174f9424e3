//! Client-side request engine for the elliptics distributed object store.
//!
//! The engine turns user-level operations (read/write/lookup/remove/exec/
//! bulk/range) into wire transactions dispatched through a [`Transport`],
//! aggregates the replies under configurable filter and checker predicates,
//! and exposes every operation as an [`AsyncResult`] stream suitable for
//! both fire-and-forget and synchronous use.
//!
//! Entry point is the [`Session`]: a cheap handle carrying the routing
//! policy (target groups), I/O flags, timeouts and reply predicates, with a
//! factory method per operation.

mod bulk;
mod callback;
mod cas;
mod latest;
mod range;

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod predicate;
pub mod result;
pub mod session;
pub mod sim;
pub mod transform;
pub mod transport;

pub use config::ClientConfig;
pub use entry::{
    Entry, ExecEntry, GenericEntry, IteratorEntry, LookupEntry, ReadEntry, ReplyData, StatEntry,
    WriteEntry,
};
pub use error::{Error, Result};
pub use key::Key;
pub use predicate::{Checker, Filter};
pub use result::{aggregate, AsyncResult, ResultSender};
pub use session::{ExceptionsPolicy, PolicySnapshot, ScopedPolicy, Session};
pub use transport::{NodeStatus, ReplyEvent, ReplyFrame, StatusTarget, Transport};
