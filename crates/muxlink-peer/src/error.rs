/// Errors that can occur in server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] muxlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] muxlink_frame::FrameError),

    /// Every connection attempt in the retry budget failed.
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    /// The connection is gone and will not be re-established.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The execution-strategy selector is not recognised.
    #[error("unknown server mode {0:?} (expected thread, pool or event-loop)")]
    UnknownMode(String),

    /// The async runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(std::io::Error),
}

impl PeerError {
    /// True for failures of the underlying connection (as opposed to
    /// configuration or framing problems).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionFailed { .. }
                | Self::Disconnected(_)
                | Self::Frame(muxlink_frame::FrameError::Io(_))
                | Self::Frame(muxlink_frame::FrameError::ConnectionClosed)
        )
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
