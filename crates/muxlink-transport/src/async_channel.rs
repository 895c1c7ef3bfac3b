use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Async counterpart of [`Channel`](crate::Channel): plain TCP or TLS over
/// TCP on the tokio runtime.
pub struct AsyncChannel {
    inner: AsyncInner,
    peer: Option<SocketAddr>,
}

enum AsyncInner {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    #[cfg(feature = "tls")]
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncChannel {
    /// Wrap a plain tokio TCP stream.
    pub fn plain(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            inner: AsyncInner::Plain(stream),
            peer,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_server(stream: tokio_rustls::server::TlsStream<TcpStream>) -> Self {
        let peer = stream.get_ref().0.peer_addr().ok();
        Self {
            inner: AsyncInner::TlsServer(Box::new(stream)),
            peer,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_client(stream: tokio_rustls::client::TlsStream<TcpStream>) -> Self {
        let peer = stream.get_ref().0.peer_addr().ok();
        Self {
            inner: AsyncInner::TlsClient(Box::new(stream)),
            peer,
        }
    }

    /// Address of the remote end, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether this channel is protected by TLS.
    pub fn is_secure(&self) -> bool {
        !matches!(self.inner, AsyncInner::Plain(_))
    }
}

impl AsyncRead for AsyncChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AsyncInner::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            AsyncInner::TlsServer(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            AsyncInner::TlsClient(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            AsyncInner::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            AsyncInner::TlsServer(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            AsyncInner::TlsClient(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AsyncInner::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            AsyncInner::TlsServer(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(feature = "tls")]
            AsyncInner::TlsClient(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AsyncInner::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            AsyncInner::TlsServer(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            AsyncInner::TlsClient(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for AsyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            AsyncInner::Plain(_) => "plain",
            #[cfg(feature = "tls")]
            AsyncInner::TlsServer(_) => "tls-server",
            #[cfg(feature = "tls")]
            AsyncInner::TlsClient(_) => "tls-client",
        };
        f.debug_struct("AsyncChannel")
            .field("type", &kind)
            .field("peer", &self.peer)
            .finish()
    }
}
