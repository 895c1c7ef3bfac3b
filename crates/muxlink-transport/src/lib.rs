//! TCP transport for muxlink.
//!
//! This is the lowest layer of muxlink. It owns everything that touches a
//! socket directly:
//! - binding listeners and dialing peers over TCP
//! - per-connection socket tuning (`TCP_NODELAY`, `SO_KEEPALIVE`)
//! - the [`Channel`] byte stream, plain or upgraded to mutual TLS
//! - classifying bounded-wait reads into a [`ReadResult`]
//!
//! Everything else builds on top of [`Channel`] (blocking) and, with the
//! `async` feature, [`AsyncChannel`].

#[cfg(feature = "async")]
pub mod async_channel;
pub mod channel;
pub mod error;
pub mod security;
pub mod tcp;
#[cfg(feature = "tls")]
mod tls;

#[cfg(feature = "async")]
pub use async_channel::AsyncChannel;
pub use channel::{is_timeout, Channel, ReadResult};
pub use error::{Result, TransportError};
pub use security::{Auth, ChannelSecurity};
pub use tcp::{connect, host_of, tune_stream, TcpTransport};
#[cfg(feature = "async")]
pub use tcp::{connect_async, tune_async_stream};
