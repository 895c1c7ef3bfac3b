//! Single-threaded cooperative scheduler: one task per connection.

use std::sync::Arc;
use std::time::Duration;

use muxlink_transport::{tune_async_stream, ChannelSecurity, TcpTransport};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::ConnectionLoop;
use crate::error::{PeerError, Result};
use crate::server::StatsCounters;
use crate::shutdown::ShutdownSignal;

pub(crate) struct EventLoop {
    pub listener: TcpTransport,
    pub security: ChannelSecurity,
    pub conn: ConnectionLoop,
    pub shutdown: ShutdownSignal,
    pub stats: Arc<StatsCounters>,
    pub drain_timeout: Duration,
    pub accept_backoff: Duration,
}

impl EventLoop {
    /// Run the accept loop on a fresh current-thread runtime until shutdown.
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PeerError::Runtime)?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> Result<()> {
        let listener = self.listener.into_async()?;
        let tracker = TaskTracker::new();
        let handshake_timeout = self.conn.config().read_timeout;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(self.accept_backoff).await;
                    continue;
                }
            };

            self.stats.accepted();
            if let Err(err) = tune_async_stream(&stream) {
                debug!(peer = %peer, error = %err, "failed to tune socket");
            }

            let conn = self.conn.clone();
            let security = self.security.clone();
            let shutdown = self.shutdown.clone();
            let stats = Arc::clone(&self.stats);
            tracker.spawn(async move {
                let upgraded =
                    tokio::time::timeout(handshake_timeout, security.upgrade_server_async(stream))
                        .await;
                match upgraded {
                    Ok(Ok(channel)) => {
                        conn.run_async(channel, Some(peer), &shutdown).await;
                    }
                    Ok(Err(err)) => debug!(peer = %peer, error = %err, "secure channel setup failed"),
                    Err(_) => debug!(peer = %peer, "secure channel setup timed out"),
                }
                stats.completed();
            });
        }

        info!(active = tracker.len(), "draining connections");
        tracker.close();
        if tokio::time::timeout(self.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(active = tracker.len(), "connections did not drain in time");
        }
        Ok(())
    }
}
