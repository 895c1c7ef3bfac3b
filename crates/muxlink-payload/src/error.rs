/// Errors that can occur while sealing, opening or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The blob does not start with the envelope marker.
    #[error("payload is not an envelope (missing \"ENC\" marker)")]
    MissingMagic,

    /// The blob is too short to hold the envelope header and MAC.
    #[error("envelope truncated ({len} bytes, min {min})")]
    Truncated { len: usize, min: usize },

    /// The MAC did not verify; the payload was not decrypted.
    #[error("envelope authentication failed")]
    AuthenticationFailed,

    /// The derived key was rejected by the MAC primitive.
    #[error("invalid envelope key: {0}")]
    InvalidKey(String),

    /// The OS entropy source failed.
    #[error("failed to gather randomness: {0}")]
    Entropy(String),

    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PayloadError {
    /// True for failures of the integrity check or envelope format.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::MissingMagic | Self::Truncated { .. } | Self::AuthenticationFailed
        )
    }
}

pub type Result<T> = std::result::Result<T, PayloadError>;
