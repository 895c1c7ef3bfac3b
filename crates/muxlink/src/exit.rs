use std::fmt;
use std::io;

use muxlink_frame::FrameError;
use muxlink_payload::PayloadError;
use muxlink_peer::PeerError;
use muxlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
/// Envelope verification failures and malformed payloads.
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Map an I/O error, using `fallback` for kinds without a dedicated code.
pub fn io_error(context: &str, err: io::Error, fallback: i32) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        _ => fallback,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source, TRANSPORT_ERROR),
        TransportError::Tls(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        TransportError::InvalidMaterial { .. } | TransportError::TlsUnavailable => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source, TRANSPORT_ERROR),
        FrameError::PayloadTooLarge { .. } | FrameError::BufferOverflow { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::ConnectionFailed { .. } | PeerError::Disconnected(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::UnknownMode(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn payload_error(context: &str, err: PayloadError) -> CliError {
    let code = if err.is_security() || matches!(err, PayloadError::Json(_)) {
        DATA_INVALID
    } else {
        INTERNAL
    };
    CliError::new(code, format!("{context}: {err}"))
}
