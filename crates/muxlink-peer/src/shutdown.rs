use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "async")]
use tokio_util::sync::CancellationToken;

/// Cooperative stop flag shared by an accept loop and its connections.
///
/// Blocking loops poll [`is_triggered`](Self::is_triggered) between reads;
/// async tasks await [`cancelled`](Self::cancelled).
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    #[cfg(feature = "async")]
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        #[cfg(feature = "async")]
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Completes once [`trigger`](Self::trigger) has been called.
    #[cfg(feature = "async")]
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The underlying cancellation token.
    #[cfg(feature = "async")]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
