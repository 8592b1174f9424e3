//! Error taxonomy of the request engine.
//!
//! Every error carries a machine-readable wire code and a human-readable
//! message; messages name the target id by its first 6 bytes in hex plus the
//! operation parameters that matter (offset, size, group).

use elliptics_proto::command::status;
use elliptics_proto::DnetId;
use thiserror::Error;

/// Client-side error. Clonable so one terminal status can be observed by
/// every waiter of a stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{context}: not found")]
    NotFound { context: String },

    #[error("{context}: checksum mismatch")]
    ChecksumMismatch { context: String },

    #[error("{context}: timed out")]
    Timeout { context: String },

    #[error("{context}: transport failure: {message}")]
    Transport { context: String, message: String },

    #[error("{context}: no groups left to query")]
    ExhaustedGroups { context: String },

    #[error(
        "{context}: result predicate rejected: {successes}/{total} succeeded, last status {code}"
    )]
    PredicateFailed {
        context: String,
        code: i32,
        successes: usize,
        total: usize,
    },

    #[error("{context}: wire status {code}")]
    Wire { context: String, code: i32 },
}

impl Error {
    /// The negative errno this error travels as on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidArgument { .. } => status::EINVAL,
            Error::NotFound { .. } => status::ENOENT,
            Error::ChecksumMismatch { .. } => status::EINVAL,
            Error::Timeout { .. } => status::ETIMEDOUT,
            Error::Transport { .. } => status::EIO,
            Error::ExhaustedGroups { .. } => status::ENOENT,
            Error::PredicateFailed { code, .. } => *code,
            Error::Wire { code, .. } => *code,
        }
    }

    /// Maps a negative wire status back into an error kind.
    pub fn from_wire(code: i32, context: impl Into<String>) -> Error {
        let context = context.into();
        match code {
            status::ENOENT => Error::NotFound { context },
            status::ETIMEDOUT => Error::Timeout { context },
            status::EINVAL => Error::InvalidArgument {
                message: context,
            },
            other => Error::Wire {
                context,
                code: other,
            },
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Error {
        Error::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Formats the standard id-plus-operation context used in error messages,
/// e.g. `ab12cd34ef56: READ: offset: 0, size: 128, group: 2`.
pub fn op_context(id: &DnetId, detail: impl AsRef<str>) -> String {
    format!("{}: {}", id.id.hex_prefix(6), detail.as_ref())
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use elliptics_proto::RawId;

    #[test]
    fn test_codes() {
        assert_eq!(Error::invalid_argument("x").code(), -22);
        assert_eq!(
            Error::NotFound {
                context: "c".into()
            }
            .code(),
            -2
        );
        assert_eq!(
            Error::Timeout {
                context: "c".into()
            }
            .code(),
            -110
        );
        assert_eq!(
            Error::PredicateFailed {
                context: "c".into(),
                code: -5,
                successes: 1,
                total: 3
            }
            .code(),
            -5
        );
    }

    #[test]
    fn test_from_wire_round_trip() {
        assert!(matches!(
            Error::from_wire(-2, "ctx"),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            Error::from_wire(-110, "ctx"),
            Error::Timeout { .. }
        ));
        assert!(matches!(
            Error::from_wire(-22, "ctx"),
            Error::InvalidArgument { .. }
        ));
        assert!(matches!(
            Error::from_wire(-5, "ctx"),
            Error::Wire { code: -5, .. }
        ));
    }

    #[test]
    fn test_op_context_formats_id_prefix() {
        let mut raw = [0u8; 64];
        raw[0] = 0xab;
        raw[1] = 0x12;
        let id = DnetId::new(RawId::new(raw), 2);
        let ctx = op_context(&id, "READ: offset: 0, size: 128");
        assert!(ctx.starts_with("ab12"));
        assert!(ctx.contains("READ"));
    }
}
