use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// Outcome of a single bounded-wait read from a channel.
///
/// Read loops consume this instead of matching on `io::ErrorKind` at every
/// call site: a timeout is an expected, non-terminal outcome, while
/// end-of-stream and transport errors end the connection.
#[derive(Debug)]
pub enum ReadResult {
    /// `n` bytes were read.
    Data(usize),
    /// The peer half-closed the stream (zero-length read).
    EndOfStream,
    /// The bounded wait elapsed with no data.
    Timeout,
    /// Any other channel-level failure.
    TransportError(io::Error),
}

impl ReadResult {
    /// Classify the result of a `read` call.
    pub fn classify(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => Self::EndOfStream,
            Ok(n) => Self::Data(n),
            Err(err) if is_timeout(&err) || err.kind() == ErrorKind::Interrupted => Self::Timeout,
            // rustls reports a peer that vanished without close_notify this way.
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Self::EndOfStream,
            Err(err) => Self::TransportError(err),
        }
    }

    /// True when the connection cannot continue after this result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::TransportError(_))
    }
}

/// Returns true if `err` is what a socket read timeout produces.
///
/// Unix reports `WouldBlock`, Windows reports `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// A connected byte stream, plain TCP or TLS over TCP.
///
/// This is the fundamental I/O type returned by [`ChannelSecurity`]
/// upgrades. It implements `Read + Write` regardless of the security mode.
///
/// [`ChannelSecurity`]: crate::ChannelSecurity
pub struct Channel {
    inner: ChannelInner,
    peer: Option<SocketAddr>,
}

enum ChannelInner {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    TlsServer(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
    #[cfg(feature = "tls")]
    TlsClient(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Plain(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(stream) => stream.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Plain(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            ChannelInner::Plain(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(stream) => stream.flush(),
        }
    }
}

impl Channel {
    /// Wrap a plain TCP stream without any transport security.
    pub fn plain(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            inner: ChannelInner::Plain(stream),
            peer,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_server(
        stream: rustls::StreamOwned<rustls::ServerConnection, TcpStream>,
    ) -> Self {
        let peer = stream.sock.peer_addr().ok();
        Self {
            inner: ChannelInner::TlsServer(Box::new(stream)),
            peer,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_client(
        stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    ) -> Self {
        let peer = stream.sock.peer_addr().ok();
        Self {
            inner: ChannelInner::TlsClient(Box::new(stream)),
            peer,
        }
    }

    /// The underlying TCP socket.
    pub fn tcp(&self) -> &TcpStream {
        match &self.inner {
            ChannelInner::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(stream) => &stream.sock,
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(stream) => &stream.sock,
        }
    }

    /// Address of the remote end, if it was known when the channel was built.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether this channel is protected by TLS.
    pub fn is_secure(&self) -> bool {
        !matches!(self.inner, ChannelInner::Plain(_))
    }

    /// Set read timeout on the underlying socket.
    ///
    /// `Some(Duration::ZERO)` is rejected by the OS; callers pass `None` to
    /// block indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.tcp().set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.tcp().set_write_timeout(timeout).map_err(Into::into)
    }

    /// Close both directions of the channel.
    ///
    /// TLS channels send `close_notify` first on a best-effort basis.
    pub fn shutdown(&mut self) -> Result<()> {
        match &mut self.inner {
            ChannelInner::Plain(_) => {}
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.conn.complete_io(&mut stream.sock);
            }
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.conn.complete_io(&mut stream.sock);
            }
        }
        match self.tcp().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            ChannelInner::Plain(_) => "plain",
            #[cfg(feature = "tls")]
            ChannelInner::TlsServer(_) => "tls-server",
            #[cfg(feature = "tls")]
            ChannelInner::TlsClient(_) => "tls-client",
        };
        f.debug_struct("Channel")
            .field("type", &kind)
            .field("peer", &self.peer)
            .finish()
    }
}
