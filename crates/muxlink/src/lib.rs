//! Framed, optionally encrypted TCP messaging.
//!
//! muxlink moves discrete messages over TCP: each message is a 4-byte
//! big-endian length followed by its payload. Servers pick how they run
//! connections (a thread each, a bounded pool, or one async event loop);
//! clients reconnect with exponential backoff. Channels can be upgraded to
//! mutual TLS, and individual payloads can be sealed in a password-keyed
//! envelope.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener/dialer, socket tuning, plain or TLS channels
//! - [`frame`]: Length-prefixed framing with a bounded receive buffer
//! - [`payload`]: Envelope encryption and the JSON codec
//! - [`peer`]: Servers, connection loops and clients (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use muxlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use muxlink_frame::*;
}

/// Re-export payload types.
pub mod payload {
    pub use muxlink_payload::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use muxlink_peer::*;
}
