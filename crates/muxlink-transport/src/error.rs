use std::path::PathBuf;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate, key or trust-anchor material could not be loaded.
    #[error("invalid secure channel material {path}: {reason}")]
    InvalidMaterial { path: PathBuf, reason: String },

    /// The TLS layer rejected the configuration or the handshake.
    #[error("tls error: {0}")]
    Tls(String),

    /// Secure channel material was supplied to a build without TLS support.
    #[error("secure channel material supplied but muxlink was built without the `tls` feature")]
    TlsUnavailable,
}

pub type Result<T> = std::result::Result<T, TransportError>;
