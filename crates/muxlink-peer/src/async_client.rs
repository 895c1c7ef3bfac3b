use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use muxlink_frame::{write_frame_async, AsyncFrameReader, FrameError};
use muxlink_transport::{connect_async, host_of, AsyncChannel, ChannelSecurity, ReadResult};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientConfig;
use crate::connection::CloseReason;
use crate::error::{PeerError, Result};

/// Async client: a background task reads frames into a bounded queue that
/// `recv` drains.
///
/// When the queue is full the receive task waits for space, which in turn
/// stops reading from the socket.
pub struct AsyncClient {
    config: ClientConfig,
    security: ChannelSecurity,
    session: Mutex<Option<Session>>,
}

struct Session {
    writer: Arc<Mutex<WriteHalf<AsyncChannel>>>,
    inbox: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Shared handles cloned out of the session so I/O does not hold the
/// session lock.
#[derive(Clone)]
struct Handles {
    writer: Arc<Mutex<WriteHalf<AsyncChannel>>>,
    inbox: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    alive: Arc<AtomicBool>,
}

impl Session {
    fn handles(&self) -> Handles {
        Handles {
            writer: Arc::clone(&self.writer),
            inbox: Arc::clone(&self.inbox),
            alive: Arc::clone(&self.alive),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!("receive task panicked");
            }
        }
        if let Err(err) = self.writer.lock().await.shutdown().await {
            debug!(error = %err, "stream shutdown failed");
        }
    }
}

impl AsyncClient {
    /// Create a client. No connection is made until [`connect`](Self::connect)
    /// or the first `send` / `recv`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let security = ChannelSecurity::client(config.auth.as_ref())?;
        Ok(Self {
            config,
            security,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect unless already connected, retrying with capped backoff.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(Session::is_alive) {
            return Ok(());
        }
        self.establish(&mut session).await.map(|_| ())
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(Session::is_alive)
    }

    /// Send one message, connecting first if needed.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let handles = self.ensure_connected().await?;
        let mut writer = handles.writer.lock().await;
        if let Err(err) = write_frame_async(&mut *writer, payload).await {
            if !matches!(err, FrameError::PayloadTooLarge { .. }) {
                // The next call reconnects instead of reusing a broken stream.
                handles.alive.store(false, Ordering::SeqCst);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next message (indefinitely when `None`).
    ///
    /// Messages that arrived before a disconnect are delivered first.
    /// Returns `Ok(None)` on timeout or when the connection ends while
    /// waiting. The timeout also covers waiting behind another `recv` that
    /// holds the queue.
    pub async fn recv(&self, timeout: Option<Duration>) -> Result<Option<Bytes>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        if let Some(handles) = self.current().await {
            if let Ok(mut inbox) = handles.inbox.try_lock() {
                if let Ok(message) = inbox.try_recv() {
                    return Ok(Some(message));
                }
            }
        }

        let handles = self.ensure_connected().await?;
        let next = async {
            let mut inbox = handles.inbox.lock().await;
            inbox.recv().await
        };
        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, next).await {
                Ok(message) => Ok(message),
                Err(_) => Ok(None),
            },
            None => Ok(next.await),
        }
    }

    /// Stop the receive task, wait for it to finish, then close the stream.
    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
            debug!(addr = %self.config.address, "client closed");
        }
    }

    async fn current(&self) -> Option<Handles> {
        self.session.lock().await.as_ref().map(Session::handles)
    }

    async fn ensure_connected(&self) -> Result<Handles> {
        let mut session = self.session.lock().await;
        if let Some(live) = session.as_ref() {
            if live.is_alive() {
                return Ok(live.handles());
            }
            // Only the first connection is unconditional.
            if !self.config.auto_reconnect {
                return Err(PeerError::Disconnected(
                    "connection lost and auto-reconnect is disabled".to_string(),
                ));
            }
        }
        self.establish(&mut session).await
    }

    async fn establish(&self, slot: &mut Option<Session>) -> Result<Handles> {
        if let Some(old) = slot.take() {
            old.close().await;
        }

        let policy = &self.config.reconnect;
        let mut last_err = String::from("no attempts made");
        for attempt in 0..policy.max_attempts {
            let delay = policy.capped_delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match tokio::time::timeout(self.config.timeout, self.open()).await {
                Ok(Ok(channel)) => {
                    if attempt > 0 {
                        info!(addr = %self.config.address, attempt, "reconnected");
                    }
                    let session = self.start(channel);
                    let handles = session.handles();
                    *slot = Some(session);
                    return Ok(handles);
                }
                Ok(Err(err)) => last_err = err.to_string(),
                Err(_) => last_err = format!("timed out after {:?}", self.config.timeout),
            }
            debug!(
                addr = %self.config.address,
                attempt,
                error = %last_err,
                "connect attempt failed"
            );
        }

        Err(PeerError::ConnectionFailed {
            attempts: policy.max_attempts,
            reason: last_err,
        })
    }

    async fn open(&self) -> Result<AsyncChannel> {
        let stream = connect_async(&self.config.address).await?;
        let channel = self
            .security
            .upgrade_client_async(stream, host_of(&self.config.address))
            .await?;
        Ok(channel)
    }

    fn start(&self, channel: AsyncChannel) -> Session {
        let (read_half, write_half) = tokio::io::split(channel);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(receive_loop(
            AsyncFrameReader::with_config(read_half, self.config.frame.clone()),
            tx,
            cancel.clone(),
            Arc::clone(&alive),
            self.config.timeout,
        ));

        Session {
            writer: Arc::new(Mutex::new(write_half)),
            inbox: Arc::new(Mutex::new(rx)),
            alive,
            cancel,
            task,
        }
    }
}

async fn receive_loop(
    mut reader: AsyncFrameReader<ReadHalf<AsyncChannel>>,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    read_timeout: Duration,
) {
    let reason = 'recv: loop {
        let filled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'recv CloseReason::Cancelled,
            filled = reader.fill(Some(read_timeout)) => filled,
        };
        match filled {
            Ok(ReadResult::Data(_)) => {
                while let Some(message) = reader.next_frame() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'recv CloseReason::Cancelled,
                        sent = tx.send(message) => {
                            if sent.is_err() {
                                break 'recv CloseReason::Cancelled;
                            }
                        }
                    }
                }
            }
            Ok(ReadResult::Timeout) => continue,
            Ok(ReadResult::EndOfStream) => break CloseReason::PeerClosed,
            Ok(ReadResult::TransportError(err)) => break CloseReason::Transport(err.to_string()),
            Err(FrameError::BufferOverflow { size, max }) => {
                warn!(size, max, "receive buffer overflow, dropping connection");
                break CloseReason::BufferOverflow;
            }
            Err(err) => break CloseReason::Transport(err.to_string()),
        }
    };

    alive.store(false, Ordering::SeqCst);
    debug!(reason = %reason, "receive task finished");
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut() {
            session.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("addr", &self.config.address)
            .field("auto_reconnect", &self.config.auto_reconnect)
            .finish_non_exhaustive()
    }
}
