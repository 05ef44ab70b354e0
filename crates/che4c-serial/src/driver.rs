//! Poll driver
//!
//! Runs registry poll cycles for one link on a fixed cadence, the way a UI
//! frame loop would. Poll cycles run on tokio's blocking pool since serial
//! reads are synchronous.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::protocol::{SerialLink, TransceiverRegistry};

/// Handle to a running poll loop
pub struct PollDriver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollDriver {
    /// Start polling `link` every `interval`.
    ///
    /// The loop ends when [`stop`](Self::stop) is called or the link is
    /// stopped. Must be called from within a tokio runtime.
    pub fn spawn(registry: Arc<TransceiverRegistry>, link: SerialLink, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(link = %link.name(), ?interval, "poll driver started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if link.is_stopped() {
                    tracing::debug!(link = %link.name(), "link stopped, ending poll loop");
                    break;
                }

                let registry = registry.clone();
                let cycle_link = link.clone();
                let cycle =
                    tokio::task::spawn_blocking(move || registry.poll(Some(&cycle_link))).await;
                if let Err(e) = cycle {
                    tracing::warn!(link = %link.name(), "poll cycle failed: {e}");
                }
            }

            tracing::debug!(link = %link.name(), "poll driver finished");
        });

        Self { cancel, handle }
    }

    /// Request the loop to stop after the current cycle
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Token that stops this driver when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the loop to finish
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!("poll driver task ended abnormally: {e}");
        }
    }
}
