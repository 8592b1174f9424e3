//! Wire-level data model for the elliptics object store client.
//!
//! This crate defines everything that crosses the wire boundary:
//! - fixed-width object identifiers and their total ordering
//! - reference-counted slicable data buffers
//! - command codes, control/I-O flag bitmasks and per-reply headers
//! - I/O attributes and file-info records
//! - transaction control descriptors
//! - the exec (server-side script) framing protocol
//!
//! The request engine itself lives in `elliptics-client`; this crate has no
//! I/O of its own.

pub mod command;
pub mod control;
pub mod data;
pub mod error;
pub mod exec;
pub mod id;
pub mod io;

pub use command::{Command, CommandHeader};
pub use control::TransactionControl;
pub use data::DataBuffer;
pub use error::{ProtoError, Result};
pub use exec::{ExecContext, SphHeader};
pub use id::{DnetId, RawId, ID_SIZE};
pub use io::{FileInfo, IoAttr, IteratorRequest};
