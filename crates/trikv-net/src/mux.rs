//! Length-prefixed framing
//!
//! Every message is an 8-byte big-endian payload length followed by exactly
//! that many payload bytes. The [`Multiplexer`] owns one stream and moves
//! whole frames over it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, NetResult};

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 8;

/// Largest payload accepted when none is configured.
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Frames messages over a byte stream.
///
/// Inbound and outbound payloads are capped separately.
#[derive(Debug)]
pub struct Multiplexer<S> {
    stream: S,
    max_frame_size: u64,
    max_send_size: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Multiplexer<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Cap both directions at `max_frame_size`.
    pub fn with_max_frame_size(stream: S, max_frame_size: u64) -> Self {
        Self::with_limits(stream, max_frame_size, max_frame_size)
    }

    /// Cap received payloads at `max_frame_size` and sent ones at `max_send_size`.
    pub fn with_limits(stream: S, max_frame_size: u64, max_send_size: u64) -> Self {
        Self { stream, max_frame_size, max_send_size }
    }

    /// Write one frame and flush it.
    pub async fn send(&mut self, payload: &[u8]) -> NetResult<()> {
        let length = payload.len() as u64;
        if length > self.max_send_size {
            return Err(NetError::FrameTooLarge { length, max: self.max_send_size });
        }
        self.stream.write_u64(length).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one frame.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly between frames. A stream
    /// ending inside a prefix or payload is [`NetError::UnexpectedEof`]. An
    /// oversized frame is skipped and reported as [`NetError::FrameTooLarge`].
    pub async fn receive(&mut self) -> NetResult<Option<Vec<u8>>> {
        let mut prefix = [0u8; PREFIX_LEN];
        let read = self.read_full(&mut prefix).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < PREFIX_LEN {
            return Err(NetError::UnexpectedEof { expected: PREFIX_LEN as u64, received: read as u64 });
        }

        let length = u64::from_be_bytes(prefix);
        if length > self.max_frame_size {
            let skipped = tokio::io::copy(&mut (&mut self.stream).take(length), &mut tokio::io::sink()).await?;
            if skipped < length {
                return Err(NetError::UnexpectedEof { expected: length, received: skipped });
            }
            return Err(NetError::FrameTooLarge { length, max: self.max_frame_size });
        }

        let mut payload = vec![0u8; length as usize];
        let read = self.read_full(&mut payload).await?;
        if read < payload.len() {
            return Err(NetError::UnexpectedEof { expected: length, received: read as u64 });
        }
        Ok(Some(payload))
    }

    /// Fill `buf` unless the stream ends first. Returns the bytes read.
    async fn read_full(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
