//! Per-connection read/dispatch/write cycle shared by every server strategy.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use muxlink_frame::{write_frame, FrameConfig, FrameError, FrameReader};
use muxlink_transport::{Channel, ReadResult};
use tracing::{debug, trace, warn};

use crate::handler::{dispatch, MessageHandler};
use crate::shutdown::ShutdownSignal;

/// Default inactivity timeout for a connection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// How often a blocking loop wakes to check for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What a loop does when a read times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Close the connection once it has been idle for the read timeout.
    Close,
    /// Keep waiting; a timeout only means "check for cancellation again".
    KeepAlive,
}

/// Connection-loop tuning.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub frame: FrameConfig,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub idle: IdlePolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle: IdlePolicy::Close,
        }
    }
}

impl LoopConfig {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_idle(mut self, idle: IdlePolicy) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_max_buffer(mut self, max: usize) -> Self {
        self.frame.max_buffer_size = max;
        self
    }

    /// Length of a single blocking read before the loop re-checks shutdown.
    fn read_slice(&self) -> Duration {
        self.poll_interval
            .min(self.read_timeout)
            .max(Duration::from_millis(1))
    }
}

/// Why a connection loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end.
    PeerClosed,
    /// No data arrived within the read timeout.
    TimedOut,
    /// Buffered partial data exceeded the configured cap.
    BufferOverflow,
    /// Reading or writing failed.
    Transport(String),
    /// The server (or client) is shutting down.
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::TimedOut => f.write_str("idle timeout"),
            Self::BufferOverflow => f.write_str("buffer overflow"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Reads framed messages, hands each to the handler in arrival order and
/// writes back any non-empty response.
///
/// A loop always releases its channel before returning, whatever the
/// reason. Handler failures are logged and never end the loop.
#[derive(Clone)]
pub struct ConnectionLoop {
    config: LoopConfig,
    handler: Arc<dyn MessageHandler>,
}

impl ConnectionLoop {
    pub fn new(handler: Arc<dyn MessageHandler>, config: LoopConfig) -> Self {
        Self { config, handler }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive a blocking channel until it closes or `shutdown` fires.
    pub fn run(&self, channel: Channel, shutdown: &ShutdownSignal) -> CloseReason {
        let peer = channel.peer_addr();
        let slice = self.config.read_slice();
        if let Err(err) = channel.set_read_timeout(Some(slice)) {
            return self.finish(channel, peer, CloseReason::Transport(err.to_string()));
        }

        let mut reader = FrameReader::with_config(channel, self.config.frame.clone());
        let mut last_activity = Instant::now();

        let reason = 'conn: loop {
            if shutdown.is_triggered() {
                break CloseReason::Cancelled;
            }
            match reader.fill() {
                Ok(ReadResult::Data(n)) => {
                    trace!(peer = ?peer, bytes = n, "read");
                    while let Some(message) = reader.next_frame() {
                        let Some(response) = dispatch(self.handler.as_ref(), &message, peer)
                        else {
                            continue;
                        };
                        if let Err(err) = write_frame(reader.get_mut(), &response) {
                            break 'conn CloseReason::Transport(err.to_string());
                        }
                    }
                    // The idle wait starts at the next read, not before dispatch.
                    last_activity = Instant::now();
                }
                Ok(ReadResult::Timeout) => {
                    if self.config.idle == IdlePolicy::Close
                        && last_activity.elapsed() >= self.config.read_timeout
                    {
                        break CloseReason::TimedOut;
                    }
                }
                Ok(ReadResult::EndOfStream) => break CloseReason::PeerClosed,
                Ok(ReadResult::TransportError(err)) => {
                    break CloseReason::Transport(err.to_string())
                }
                Err(FrameError::BufferOverflow { size, max }) => {
                    warn!(peer = ?peer, size, max, "receive buffer overflow, closing connection");
                    break CloseReason::BufferOverflow;
                }
                Err(err) => break CloseReason::Transport(err.to_string()),
            }
        };

        self.finish(reader.into_inner(), peer, reason)
    }

    fn finish(
        &self,
        mut channel: Channel,
        peer: Option<SocketAddr>,
        reason: CloseReason,
    ) -> CloseReason {
        if let Err(err) = channel.shutdown() {
            trace!(peer = ?peer, error = %err, "channel shutdown failed");
        }
        debug!(peer = ?peer, reason = %reason, "connection closed");
        reason
    }

    /// Drive an async stream until it closes or `cancel` fires.
    #[cfg(feature = "async")]
    pub async fn run_async<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
        cancel: &ShutdownSignal,
    ) -> CloseReason
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        use muxlink_frame::{write_frame_async, AsyncFrameReader};
        use tokio::io::AsyncWriteExt;

        let mut reader = AsyncFrameReader::with_config(stream, self.config.frame.clone());

        let reason = 'conn: loop {
            let filled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'conn CloseReason::Cancelled,
                filled = reader.fill(Some(self.config.read_timeout)) => filled,
            };
            match filled {
                Ok(ReadResult::Data(n)) => {
                    trace!(peer = ?peer, bytes = n, "read");
                    while let Some(message) = reader.next_frame() {
                        let Some(response) = dispatch(self.handler.as_ref(), &message, peer)
                        else {
                            continue;
                        };
                        if let Err(err) = write_frame_async(reader.get_mut(), &response).await {
                            break 'conn CloseReason::Transport(err.to_string());
                        }
                    }
                }
                Ok(ReadResult::Timeout) => match self.config.idle {
                    IdlePolicy::KeepAlive => continue,
                    IdlePolicy::Close => break CloseReason::TimedOut,
                },
                Ok(ReadResult::EndOfStream) => break CloseReason::PeerClosed,
                Ok(ReadResult::TransportError(err)) => {
                    break CloseReason::Transport(err.to_string())
                }
                Err(FrameError::BufferOverflow { size, max }) => {
                    warn!(peer = ?peer, size, max, "receive buffer overflow, closing connection");
                    break CloseReason::BufferOverflow;
                }
                Err(err) => break CloseReason::Transport(err.to_string()),
            }
        };

        if let Err(err) = reader.get_mut().shutdown().await {
            trace!(peer = ?peer, error = %err, "stream shutdown failed");
        }
        debug!(peer = ?peer, reason = %reason, "connection closed");
        reason
    }
}

impl fmt::Debug for ConnectionLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
