//! Error types for the trikv wire protocol

use thiserror::Error;
use trikv_core::TrikvError;

/// Errors raised while framing, encoding or exchanging messages.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended inside a length prefix or a payload
    #[error("unexpected end of stream: expected {expected} bytes, received {received}")]
    UnexpectedEof {
        /// Bytes the frame still needed
        expected: u64,
        /// Bytes actually read before the stream closed
        received: u64,
    },

    /// A frame declared more payload than the configured maximum. The payload
    /// has been drained; the stream is aligned on the next frame.
    #[error("frame of {length} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { length: u64, max: u64 },

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Client operation attempted before a successful connect
    #[error("not connected")]
    NotConnected,

    /// The server answered with a non-empty error field
    #[error("server error: {0}")]
    Server(String),

    #[error(transparent)]
    Storage(#[from] TrikvError),
}

impl NetError {
    /// True for errors that leave the stream unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::Io(_) | NetError::UnexpectedEof { .. })
    }
}

impl From<postcard::Error> for NetError {
    fn from(err: postcard::Error) -> Self {
        NetError::Decode(err.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;
