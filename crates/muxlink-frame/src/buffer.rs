use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, DEFAULT_MAX_BUFFER};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Per-connection accumulation buffer of unconsumed bytes.
///
/// Holds at most `max_size` bytes. Appending past the cap fails with
/// [`FrameError::BufferOverflow`] and leaves the buffer unchanged; the
/// caller is expected to drop the connection.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.min(max_size)),
            max_size,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        let size = self.buf.len() + data.len();
        if size > self.max_size {
            return Err(FrameError::BufferOverflow {
                size,
                max: self.max_size,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        decode_frame(&mut self.buf)
    }

    /// Pop every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Buffered bytes not yet consumed as frames.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Discard everything buffered (used when a connection is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}
