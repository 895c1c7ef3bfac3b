//! Payload-boundary transforms for muxlink.
//!
//! Two independent layers applied to application bytes before they are
//! framed:
//! - [`Envelope`]: password-keyed authenticated encryption
//!   (`"ENC" | SALT | NONCE | CIPHERTEXT | MAC`)
//! - [`JsonCodec`]: UTF-8 JSON for structured messages
//!
//! Neither layer knows about sockets or frames.

pub mod envelope;
pub mod error;
pub mod json;

pub use envelope::{decrypt, encrypt, Envelope};
pub use error::{PayloadError, Result};
pub use json::JsonCodec;
