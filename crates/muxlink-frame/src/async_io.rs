use std::io::ErrorKind;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use muxlink_transport::ReadResult;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::buffer::FrameBuffer;
use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE};
use crate::error::Result;

/// Async counterpart of [`FrameReader`](crate::FrameReader).
pub struct AsyncFrameReader<R> {
    inner: R,
    buf: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> AsyncFrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: FrameBuffer::new(config.max_buffer_size),
            chunk: vec![0u8; config.read_chunk_size.max(1)],
        }
    }

    /// Perform one read, waiting at most `timeout` (forever if `None`).
    ///
    /// An elapsed wait is [`ReadResult::Timeout`], never an error. The read
    /// is cancel-safe: dropping the future loses no buffered bytes.
    pub async fn fill(&mut self, timeout: Option<Duration>) -> Result<ReadResult> {
        let read = self.inner.read(&mut self.chunk);
        let result = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read).await {
                Ok(result) => ReadResult::classify(result),
                Err(_elapsed) => ReadResult::Timeout,
            },
            None => ReadResult::classify(read.await),
        };
        if let ReadResult::Data(n) = result {
            trace!(bytes = n, buffered = self.buf.len(), "read chunk");
            self.buf.extend(&self.chunk[..n])?;
        }
        Ok(result)
    }

    /// Pop the next already-buffered frame.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.buf.next_frame()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buf
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Frame `payload`, write it in full and flush.
///
/// A full socket send buffer suspends the caller, which is the only
/// backpressure applied.
pub async fn write_frame_async<W: AsyncWrite + Unpin + ?Sized>(
    dst: &mut W,
    payload: &[u8],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut buf)?;
    match dst.write_all(&buf).await {
        Err(err) if err.kind() == ErrorKind::WriteZero => {
            return Err(crate::FrameError::ConnectionClosed)
        }
        other => other?,
    }
    dst.flush().await?;
    Ok(())
}
