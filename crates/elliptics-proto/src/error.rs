use thiserror::Error;

/// Errors produced while encoding or decoding wire structures.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid buffer size: expected {expected} bytes, got {got}")]
    InvalidSize { expected: usize, got: usize },

    #[error("truncated buffer: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("unknown command code {0}")]
    BadCommand(u32),

    #[error("event name is not valid utf-8")]
    BadEvent(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
