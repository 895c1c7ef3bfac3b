//! Servers and clients for framed muxlink messaging.
//!
//! This is the "just works" layer. A [`Server`] runs one [`ConnectionLoop`]
//! per accepted connection under a selectable execution strategy, and the
//! [`SyncClient`] / [`AsyncClient`] reconnect transparently when the link
//! drops.

pub mod admission;
#[cfg(feature = "async")]
pub mod async_client;
pub mod client;
pub mod connection;
pub mod error;
#[cfg(feature = "async")]
mod event_loop;
pub mod handler;
pub mod pool;
pub mod reconnect;
pub mod server;
pub mod shutdown;
pub mod strategy;

pub use admission::{AdmissionPermit, AdmissionState};
#[cfg(feature = "async")]
pub use async_client::AsyncClient;
pub use client::{ClientConfig, Connector, SyncClient, TcpConnector};
pub use connection::{CloseReason, ConnectionLoop, IdlePolicy, LoopConfig};
pub use error::{PeerError, Result};
pub use handler::{Echo, HandlerError, HandlerResult, MessageHandler};
pub use pool::WorkerPool;
pub use reconnect::{ReconnectPolicy, Throttle};
pub use server::{run, Mode, Server, ServerConfig, ServerStats, ShutdownHandle};
pub use shutdown::ShutdownSignal;
pub use strategy::{Admission, ExecutionStrategy, Job, ThreadPerConnection};

use std::sync::{Mutex, MutexGuard, PoisonError};

// A panicking handler must not wedge the state it shared.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
