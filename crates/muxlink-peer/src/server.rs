use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use muxlink_transport::{tune_stream, Auth, ChannelSecurity, TcpTransport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionLoop, IdlePolicy, LoopConfig};
use crate::error::{PeerError, Result};
use crate::handler::MessageHandler;
use crate::pool::{WorkerPool, DEFAULT_MAX_PENDING, DEFAULT_WORKERS};
use crate::shutdown::ShutdownSignal;
use crate::strategy::{Admission, ExecutionStrategy, Job, ThreadPerConnection};

/// Default time allowed for in-flight connections to finish on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(35);
/// Default sleep between non-blocking accept attempts.
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Server execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// One OS thread per connection.
    #[default]
    Thread,
    /// Bounded worker pool with an admission ceiling.
    Pool,
    /// Single-threaded async scheduler, one task per connection.
    EventLoop,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Pool => "pool",
            Self::EventLoop => "event-loop",
        }
    }
}

impl FromStr for Mode {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" | "threading" => Ok(Self::Thread),
            "pool" | "threadpool" => Ok(Self::Pool),
            "event-loop" | "eventloop" | "asyncio" => Ok(Self::EventLoop),
            _ => Err(PeerError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    pub bind: String,
    pub mode: Mode,
    /// Mutual-TLS material; plain TCP when absent.
    pub auth: Option<Auth>,
    pub loop_config: LoopConfig,
    /// Worker threads for [`Mode::Pool`].
    pub workers: usize,
    /// Admission ceiling for [`Mode::Pool`].
    pub max_pending: usize,
    pub drain_timeout: Duration,
    pub accept_poll: Duration,
}

impl ServerConfig {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: Mode::default(),
            auth: None,
            loop_config: LoopConfig::default(),
            workers: DEFAULT_WORKERS,
            max_pending: DEFAULT_MAX_PENDING,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            accept_poll: DEFAULT_ACCEPT_POLL,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_loop_config(mut self, loop_config: LoopConfig) -> Self {
        self.loop_config = loop_config;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Snapshot of connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub accepted: u64,
    pub refused: u64,
    pub completed: u64,
    /// Admitted connections whose loop has not finished.
    pub active: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    accepted: AtomicU64,
    refused: AtomicU64,
    completed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServerStats {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let refused = self.refused.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        ServerStats {
            accepted,
            refused,
            completed,
            active: accepted.saturating_sub(refused + completed),
        }
    }
}

/// Stops a running server from another thread and reads its counters.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    signal: ShutdownSignal,
    stats: Arc<StatsCounters>,
}

impl ShutdownHandle {
    /// Ask the server to stop accepting and drain. Idempotent.
    pub fn shutdown(&self) {
        self.signal.trigger();
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_triggered()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }
}

/// A bound listener plus everything needed to run connection loops on it.
///
/// Binding and loading TLS material happen in [`bind`](Self::bind), so
/// configuration errors surface before [`serve`](Self::serve) is called.
pub struct Server {
    listener: TcpTransport,
    config: ServerConfig,
    security: ChannelSecurity,
    conn: ConnectionLoop,
    shutdown: ShutdownSignal,
    stats: Arc<StatsCounters>,
}

impl Server {
    pub fn bind(config: ServerConfig, handler: impl MessageHandler) -> Result<Self> {
        Self::bind_shared(config, Arc::new(handler))
    }

    pub fn bind_shared(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        let security = ChannelSecurity::server(config.auth.as_ref())?;
        let listener = TcpTransport::bind(&config.bind)?;
        let mut loop_config = config.loop_config.clone();
        if config.mode == Mode::EventLoop {
            // Read timeouts only mark cancellation checkpoints on the scheduler.
            loop_config.idle = IdlePolicy::KeepAlive;
        }
        let conn = ConnectionLoop::new(handler, loop_config);
        info!(
            addr = %listener.local_addr(),
            mode = %config.mode,
            secure = !security.is_plain(),
            "server bound"
        );
        Ok(Self {
            listener,
            config,
            security,
            conn,
            shutdown: ShutdownSignal::new(),
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    /// Accept and serve connections until shut down, then drain.
    pub fn serve(self) -> Result<()> {
        info!(addr = %self.local_addr(), mode = %self.config.mode, "server listening");
        match self.config.mode {
            Mode::Thread => {
                let strategy = ThreadPerConnection::new();
                self.serve_blocking(&strategy)
            }
            Mode::Pool => {
                let strategy = WorkerPool::new(self.config.workers, self.config.max_pending);
                self.serve_blocking(&strategy)
            }
            Mode::EventLoop => self.serve_event_loop(),
        }
    }

    fn serve_blocking(self, strategy: &dyn ExecutionStrategy) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        while !self.shutdown.is_triggered() {
            match self.listener.try_accept() {
                Ok(Some((stream, peer))) => self.admit(strategy, stream, peer),
                Ok(None) => thread::sleep(self.config.accept_poll),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    thread::sleep(self.config.accept_poll);
                }
            }
        }

        info!(active = strategy.active(), strategy = strategy.name(), "server draining");
        if strategy.shutdown(self.config.drain_timeout) {
            info!("server stopped");
        } else {
            warn!(active = strategy.active(), "server stopped before all connections drained");
        }
        Ok(())
    }

    fn admit(&self, strategy: &dyn ExecutionStrategy, stream: TcpStream, peer: SocketAddr) {
        self.stats.accepted();
        if let Err(err) = tune_stream(&stream) {
            debug!(peer = %peer, error = %err, "failed to tune socket");
        }

        let conn = self.conn.clone();
        let security = self.security.clone();
        let shutdown = self.shutdown.clone();
        let stats = Arc::clone(&self.stats);
        let job: Job = Box::new(move || {
            // Bounds the TLS handshake; the loop replaces it afterwards.
            if let Err(err) = stream.set_read_timeout(Some(conn.config().read_timeout)) {
                debug!(peer = %peer, error = %err, "failed to set handshake timeout");
            }
            match security.upgrade_server(stream) {
                Ok(channel) => {
                    conn.run(channel, &shutdown);
                }
                Err(err) => debug!(peer = %peer, error = %err, "secure channel setup failed"),
            }
            stats.completed();
        });

        if strategy.execute(job) == Admission::Refused {
            self.stats.refused();
            warn!(peer = %peer, strategy = strategy.name(), "connection refused");
        }
    }

    #[cfg(feature = "async")]
    fn serve_event_loop(self) -> Result<()> {
        let Self {
            listener,
            config,
            security,
            conn,
            shutdown,
            stats,
        } = self;
        crate::event_loop::EventLoop {
            listener,
            security,
            conn,
            shutdown,
            stats,
            drain_timeout: config.drain_timeout,
            accept_backoff: config.accept_poll,
        }
        .run()
    }

    #[cfg(not(feature = "async"))]
    fn serve_event_loop(self) -> Result<()> {
        Err(PeerError::UnknownMode(format!(
            "{} (built without the async feature)",
            Mode::EventLoop
        )))
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.local_addr())
            .field("mode", &self.config.mode)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

/// Bind `addr` and serve `handler` with `mode` until the process exits.
pub fn run(
    addr: &str,
    handler: impl MessageHandler,
    mode: Mode,
    auth: Option<Auth>,
) -> Result<()> {
    let config = ServerConfig::new(addr).with_mode(mode).with_auth(auth);
    Server::bind(config, handler)?.serve()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread::JoinHandle;
    use std::time::Instant;

    use muxlink_frame::{encode, HEADER_SIZE};

    use super::*;
    use crate::handler::Echo;

    fn start(config: ServerConfig) -> (SocketAddr, ShutdownHandle, JoinHandle<Result<()>>) {
        let server = Server::bind(config, Echo).unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let join = thread::spawn(move || server.serve());
        (addr, handle, join)
    }

    fn quick(mode: Mode) -> ServerConfig {
        ServerConfig::new("127.0.0.1:0")
            .with_mode(mode)
            .with_drain_timeout(Duration::from_secs(2))
    }

    fn roundtrip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
        stream.write_all(&encode(payload).unwrap()).unwrap();
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
        stream.read_exact(&mut body).unwrap();
        body
    }

    #[test]
    fn mode_parsing_accepts_aliases() {
        assert_eq!("thread".parse::<Mode>().unwrap(), Mode::Thread);
        assert_eq!("threading".parse::<Mode>().unwrap(), Mode::Thread);
        assert_eq!("ThreadPool".parse::<Mode>().unwrap(), Mode::Pool);
        assert_eq!("asyncio".parse::<Mode>().unwrap(), Mode::EventLoop);
        assert_eq!("event-loop".parse::<Mode>().unwrap(), Mode::EventLoop);
        assert!(matches!(
            "fibers".parse::<Mode>(),
            Err(PeerError::UnknownMode(m)) if m == "fibers"
        ));
        assert_eq!(Mode::EventLoop.to_string(), "event-loop");
    }

    #[test]
    fn mode_serde_uses_kebab_case() {
        let json = serde_json::to_string(&Mode::EventLoop).unwrap();
        assert_eq!(json, "\"event-loop\"");
        let back: Mode = serde_json::from_str("\"pool\"").unwrap();
        assert_eq!(back, Mode::Pool);
    }

    #[test]
    fn bind_failure_surfaces_before_serving() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        // SO_REUSEADDR does not permit two active listeners on one port.
        let err = Server::bind(ServerConfig::new(addr), Echo).unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
    }

    #[test]
    fn every_mode_serves_concurrent_clients() {
        for mode in [Mode::Thread, Mode::Pool, Mode::EventLoop] {
            let (addr, handle, join) = start(quick(mode));
            let clients: Vec<_> = (0..4)
                .map(|i| {
                    thread::spawn(move || {
                        let mut stream = TcpStream::connect(addr).unwrap();
                        for n in 0..5 {
                            let msg = format!("{mode}-{i}-{n}");
                            assert_eq!(roundtrip(&mut stream, msg.as_bytes()), msg.as_bytes());
                        }
                    })
                })
                .collect();
            for client in clients {
                client.join().unwrap();
            }

            handle.shutdown();
            join.join().unwrap().unwrap();
            let stats = handle.stats();
            assert_eq!(stats.accepted, 4, "mode {mode}");
            assert_eq!(stats.refused, 0);
        }
    }

    #[test]
    fn pool_refuses_connections_beyond_the_ceiling() {
        let config = quick(Mode::Pool).with_workers(1).with_max_pending(1);
        let (addr, handle, join) = start(config);

        let mut first = TcpStream::connect(addr).unwrap();
        assert_eq!(roundtrip(&mut first, b"held"), b"held");

        let mut second = TcpStream::connect(addr).unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 1];
        // Refused connections are closed without a response.
        assert!(matches!(second.read(&mut buf), Ok(0) | Err(_)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.stats().refused == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.stats().refused, 1);

        drop(first);
        handle.shutdown();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_cancels_idle_connections_promptly() {
        for mode in [Mode::Thread, Mode::Pool, Mode::EventLoop] {
            let loop_config = LoopConfig::default().with_idle(IdlePolicy::KeepAlive);
            let (addr, handle, join) = start(quick(mode).with_loop_config(loop_config));

            let _idle = TcpStream::connect(addr).unwrap();
            thread::sleep(Duration::from_millis(100));

            let started = Instant::now();
            handle.shutdown();
            join.join().unwrap().unwrap();
            assert!(started.elapsed() < Duration::from_secs(2), "mode {mode}");
            assert_eq!(handle.stats().active, 0, "mode {mode}");
        }
    }
}
