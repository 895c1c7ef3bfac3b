use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: payload length as u32 big-endian.
pub const HEADER_SIZE: usize = 4;

/// Default cap on unframed bytes buffered per connection: 4 MiB.
pub const DEFAULT_MAX_BUFFER: usize = 4 * 1024 * 1024;

/// Bytes requested from the channel per read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length       │ Payload         │
/// │ (4B BE)      │ (Length bytes)  │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a single payload into a fresh buffer.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Split one frame off the front of `src`.
///
/// Returns `None` if `src` doesn't hold a complete frame yet, leaving it
/// untouched. On success the frame bytes are consumed without copying.
pub fn decode_frame(src: &mut BytesMut) -> Option<Bytes> {
    let payload_len = frame_len(src)?;
    if src.len() < HEADER_SIZE + payload_len {
        return None;
    }
    src.advance(HEADER_SIZE);
    Some(src.split_to(payload_len).freeze())
}

/// Decode every complete frame in `buffer`.
///
/// Returns the payloads in order plus the unconsumed tail, which starts at
/// the first incomplete frame.
pub fn decode(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Frames::new(buffer);
    let messages = frames.by_ref().collect();
    (messages, frames.remainder())
}

/// Lazy iterator over the complete frames in a byte slice.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    rest: &'a [u8],
}

impl<'a> Frames<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { rest: buffer }
    }

    /// Bytes not yet yielded as frames.
    pub fn remainder(&self) -> &'a [u8] {
        self.rest
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let payload_len = frame_len(self.rest)?;
        let body = self.rest.get(HEADER_SIZE..HEADER_SIZE + payload_len)?;
        self.rest = &self.rest[HEADER_SIZE + payload_len..];
        Some(body)
    }
}

fn frame_len(src: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Configuration for frame reading.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum unframed bytes buffered per connection. Default: 4 MiB.
    pub max_buffer_size: usize,
    /// Bytes requested per read. Default: 4096.
    pub read_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}
