use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of handling one message: an optional response payload.
pub type HandlerResult = Result<Option<Vec<u8>>, HandlerError>;

/// Application logic invoked once per received message.
///
/// Every execution strategy depends only on this trait. Under the event
/// loop strategy `handle` runs on the single scheduler thread, so it must
/// not block.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, payload: &[u8]) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, payload: &[u8]) -> HandlerResult {
        self(payload)
    }
}

/// Replies with every payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl MessageHandler for Echo {
    fn handle(&self, payload: &[u8]) -> HandlerResult {
        Ok(Some(payload.to_vec()))
    }
}

/// Run the handler for one message, containing errors and panics.
///
/// Returns the response to write, if any. Empty responses are dropped.
pub(crate) fn dispatch(
    handler: &dyn MessageHandler,
    payload: &[u8],
    peer: Option<SocketAddr>,
) -> Option<Vec<u8>> {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(payload))) {
        Ok(Ok(response)) => response.filter(|r| !r.is_empty()),
        Ok(Err(err)) => {
            error!(peer = ?peer, error = %err, "message handler failed");
            None
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(peer = ?peer, reason, "message handler panicked");
            None
        }
    }
}
