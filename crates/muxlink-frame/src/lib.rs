//! Length-prefixed message framing for muxlink.
//!
//! Every message on the wire is a 4-byte big-endian payload length followed
//! by exactly that many payload bytes. Readers accumulate bytes in a
//! bounded [`FrameBuffer`] and hand out complete payloads only; a peer that
//! pushes more unframed bytes than the cap allows is cut off.

#[cfg(feature = "async")]
pub mod async_io;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_io::{write_frame_async, AsyncFrameReader};
pub use buffer::FrameBuffer;
pub use codec::{
    decode, decode_frame, encode, encode_frame, FrameConfig, Frames, DEFAULT_MAX_BUFFER,
    HEADER_SIZE, READ_CHUNK_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::write_frame;
