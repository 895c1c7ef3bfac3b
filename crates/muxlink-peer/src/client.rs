use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use muxlink_frame::{write_frame, FrameConfig, FrameError, FrameReader};
use muxlink_transport::{
    connect, host_of, Auth, Channel, ChannelSecurity, ReadResult, TransportError,
};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::lock;
use crate::reconnect::{ReconnectPolicy, Throttle};

/// Default connect and read timeout for clients.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default capacity of the async client's inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Client configuration, shared by [`SyncClient`] and the async client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`. The host doubles as the TLS server name.
    pub address: String,
    pub auth: Option<Auth>,
    /// Bounds connect attempts and default receive waits.
    pub timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    pub frame: FrameConfig,
    pub queue_capacity: usize,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth: None,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            frame: FrameConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Opens channels for a [`SyncClient`].
pub trait Connector: Send + Sync {
    fn open(&self) -> Result<Channel>;

    /// Target description for logs.
    fn target(&self) -> &str;
}

/// Dials TCP and applies the configured channel security.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
    security: ChannelSecurity,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, timeout: Duration, security: ChannelSecurity) -> Self {
        Self {
            address: address.into(),
            timeout,
            security,
        }
    }

    /// Build from client configuration, loading TLS material if present.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let security = ChannelSecurity::client(config.auth.as_ref())?;
        Ok(Self::new(config.address.clone(), config.timeout, security))
    }
}

impl Connector for TcpConnector {
    fn open(&self) -> Result<Channel> {
        let stream = connect(&self.address, Some(self.timeout))?;
        // Bounds the TLS handshake as well as later writes.
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(TransportError::Io)?;
        let channel = self.security.upgrade_client(stream, host_of(&self.address))?;
        channel.set_write_timeout(Some(self.timeout))?;
        Ok(channel)
    }

    fn target(&self) -> &str {
        &self.address
    }
}

/// Blocking request/response client with transparent reconnection.
///
/// All operations serialise on one internal lock, so a client can be
/// shared between threads. Messages decoded beyond the one a `recv`
/// returns are queued for later calls.
pub struct SyncClient {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    state: Mutex<SyncState>,
}

struct SyncState {
    reader: Option<FrameReader<Channel>>,
    pending: VecDeque<Bytes>,
    throttle: Throttle,
    ever_connected: bool,
}

impl SyncClient {
    /// Create a client and connect once. Fails if that first attempt fails.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::from_config(&config)?;
        let client = Self::with_connector(config, Box::new(connector));
        client.connect()?;
        Ok(client)
    }

    /// Create a client over a custom connector without connecting.
    ///
    /// The first `send` or `recv` connects using the reconnect policy.
    pub fn with_connector(config: ClientConfig, connector: Box<dyn Connector>) -> Self {
        let throttle = Throttle::new(config.reconnect.min_interval);
        Self {
            config,
            connector,
            state: Mutex::new(SyncState {
                reader: None,
                pending: VecDeque::new(),
                throttle,
                ever_connected: false,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// (Re)establish the connection with a single attempt.
    pub fn connect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        self.open_locked(&mut state)
            .map_err(|err| PeerError::ConnectionFailed {
                attempts: 1,
                reason: err.to_string(),
            })
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).reader.is_some()
    }

    /// Send one message, reconnecting and retrying on transport failure.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let retries = if self.config.auto_reconnect {
            self.config.reconnect.max_attempts
        } else {
            0
        };

        let mut last_err = None;
        for attempt in 0..=retries {
            let connected = if attempt == 0 {
                self.ensure_connected(&mut state)
            } else {
                self.reconnect_with_retry(&mut state)
            };
            if let Err(err) = connected {
                last_err = Some(err.to_string());
                continue;
            }
            let Some(reader) = state.reader.as_mut() else {
                continue;
            };
            match write_frame(reader.get_mut(), payload) {
                Ok(()) => return Ok(()),
                Err(err @ FrameError::PayloadTooLarge { .. }) => return Err(err.into()),
                Err(err) => {
                    warn!(addr = self.connector.target(), attempt, error = %err, "send failed");
                    Self::drop_connection(&mut state);
                    last_err = Some(err.to_string());
                }
            }
        }

        Err(PeerError::ConnectionFailed {
            attempts: retries + 1,
            reason: last_err.unwrap_or_else(|| "not connected".to_string()),
        })
    }

    /// Receive the next message, waiting up to `timeout` (the configured
    /// timeout when `None`). Returns `Ok(None)` when nothing arrived in
    /// time, or when the peer closed and reconnection is disabled.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<Bytes>> {
        let mut state = lock(&self.state);
        if let Some(message) = state.pending.pop_front() {
            return Ok(Some(message));
        }
        self.ensure_connected(&mut state)?;

        let deadline = Instant::now() + timeout.unwrap_or(self.config.timeout);
        loop {
            if let Some(reader) = state.reader.as_mut() {
                if let Some(message) = reader.next_frame() {
                    let rest = reader.drain_frames();
                    state.pending.extend(rest);
                    return Ok(Some(message));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.fill(&mut state, remaining)? {
                ReadResult::Data(_) => {}
                ReadResult::Timeout => return Ok(None),
                ReadResult::EndOfStream => {
                    debug!(addr = self.connector.target(), "server closed the connection");
                    Self::drop_connection(&mut state);
                    if !self.config.auto_reconnect {
                        return Ok(None);
                    }
                    self.reconnect_with_retry(&mut state)?;
                }
                ReadResult::TransportError(err) => {
                    Self::drop_connection(&mut state);
                    return Err(PeerError::Disconnected(err.to_string()));
                }
            }
        }
    }

    /// Return every complete message already buffered plus whatever one
    /// further bounded read yields.
    pub fn recv_all(&self, timeout: Option<Duration>) -> Result<Vec<Bytes>> {
        let mut state = lock(&self.state);
        self.ensure_connected(&mut state)?;

        let mut messages: Vec<Bytes> = state.pending.drain(..).collect();
        if let Some(reader) = state.reader.as_mut() {
            messages.extend(reader.drain_frames());
        }

        match self.fill(&mut state, timeout.unwrap_or(self.config.timeout))? {
            ReadResult::Data(_) => {
                if let Some(reader) = state.reader.as_mut() {
                    messages.extend(reader.drain_frames());
                }
            }
            ReadResult::Timeout => {}
            ReadResult::EndOfStream => Self::drop_connection(&mut state),
            ReadResult::TransportError(err) => {
                Self::drop_connection(&mut state);
                if messages.is_empty() {
                    return Err(PeerError::Disconnected(err.to_string()));
                }
                warn!(error = %err, "connection lost after partial receive");
            }
        }
        Ok(messages)
    }

    /// Close the connection. Queued messages are discarded.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        Self::drop_connection(&mut state);
        state.pending.clear();
    }

    fn fill(&self, state: &mut SyncState, wait: Duration) -> Result<ReadResult> {
        let Some(reader) = state.reader.as_mut() else {
            return Err(PeerError::Disconnected("not connected".to_string()));
        };
        reader
            .get_ref()
            .set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
        match reader.fill() {
            Ok(result) => Ok(result),
            Err(err) => {
                Self::drop_connection(state);
                Err(err.into())
            }
        }
    }

    fn ensure_connected(&self, state: &mut SyncState) -> Result<()> {
        if state.reader.is_some() {
            return Ok(());
        }
        self.reconnect_with_retry(state)
    }

    fn reconnect_with_retry(&self, state: &mut SyncState) -> Result<()> {
        // The first connection is always allowed.
        if !self.config.auto_reconnect && state.ever_connected {
            return Err(PeerError::Disconnected(
                "connection lost and auto-reconnect is disabled".to_string(),
            ));
        }

        let policy = &self.config.reconnect;
        let mut last_err = None;
        for attempt in 0..policy.max_attempts {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.open_locked(state) {
                Ok(()) => {
                    if attempt > 0 {
                        info!(addr = self.connector.target(), attempt, "reconnected");
                    }
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        addr = self.connector.target(),
                        attempt,
                        error = %err,
                        "connect attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(PeerError::ConnectionFailed {
            attempts: policy.max_attempts,
            reason: last_err
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    fn open_locked(&self, state: &mut SyncState) -> Result<()> {
        state.throttle.wait();
        Self::drop_connection(state);
        let channel = self.connector.open()?;
        debug!(addr = self.connector.target(), secure = channel.is_secure(), "connected");
        state.reader = Some(FrameReader::with_config(channel, self.config.frame.clone()));
        state.ever_connected = true;
        Ok(())
    }

    fn drop_connection(state: &mut SyncState) {
        if let Some(reader) = state.reader.take() {
            let mut channel = reader.into_inner();
            if let Err(err) = channel.shutdown() {
                debug!(error = %err, "channel shutdown failed");
            }
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::drop_connection(state);
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("target", &self.connector.target())
            .field("auto_reconnect", &self.config.auto_reconnect)
            .finish_non_exhaustive()
    }
}
