use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// TCP listener.
///
/// Binds with `SO_REUSEADDR` so a restarted server can reclaim its port
/// while old connections sit in `TIME_WAIT`.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Listen backlog passed to `listen(2)`.
    pub const BACKLOG: i32 = 1024;

    /// Bind and listen on `addr` (`host:port`; port 0 picks an ephemeral port).
    pub fn bind(addr: &str) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };

        let resolved = addr
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;

        let socket = Socket::new(
            Domain::for_address(resolved),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&resolved.into()).map_err(bind_err)?;
        socket.listen(Self::BACKLOG).map_err(bind_err)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(addr = %local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// Accept without blocking; `Ok(None)` when nothing is pending.
    ///
    /// The listener must have been switched to non-blocking mode with
    /// [`set_nonblocking`](Self::set_nonblocking). The returned stream is
    /// always in blocking mode.
    pub fn try_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                // Some platforms inherit O_NONBLOCK from the listener.
                stream.set_nonblocking(false)?;
                debug!(%peer, "accepted connection");
                Ok(Some((stream, peer)))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Switch the listener between blocking and non-blocking accepts.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hand the listener over to tokio.
    #[cfg(feature = "async")]
    pub fn into_async(self) -> Result<tokio::net::TcpListener> {
        self.listener.set_nonblocking(true)?;
        tokio::net::TcpListener::from_std(self.listener).map_err(Into::into)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Connect to `addr`, trying every resolved address in order.
///
/// `timeout` bounds each individual attempt. The returned stream is tuned
/// with [`tune_stream`].
pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let connect_err = |source| TransportError::Connect {
        addr: addr.to_string(),
        source,
    };

    let mut last_err = None;
    for candidate in addr.to_socket_addrs().map_err(connect_err)? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => {
                tune_or_log(&stream);
                debug!(addr, peer = %candidate, "connected over tcp");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(connect_err(last_err.unwrap_or_else(|| {
        io::Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing")
    })))
}

/// Connect to `addr` on the tokio runtime.
#[cfg(feature = "async")]
pub async fn connect_async(addr: &str) -> Result<tokio::net::TcpStream> {
    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    if let Err(err) = tune_async_stream(&stream) {
        debug!(addr, error = %err, "socket tuning failed");
    }
    debug!(addr, "connected over tcp");
    Ok(stream)
}

/// Apply standard socket tuning: no send coalescing, keep-alive on.
pub fn tune_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

/// [`tune_stream`] for tokio streams.
#[cfg(feature = "async")]
pub fn tune_async_stream(stream: &tokio::net::TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

pub(crate) fn tune_or_log(stream: &TcpStream) {
    if let Err(err) = tune_stream(stream) {
        debug!(error = %err, "socket tuning failed");
    }
}

/// Host part of a `host:port` address, without IPv6 brackets.
///
/// Used as the TLS server name when dialing.
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
