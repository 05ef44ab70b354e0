//! Transmission tasks
//!
//! Every accepted send runs on its own thread so a write that never returns
//! cannot stall the caller. The transceiver only observes the thread through
//! its [`JoinHandle`]; there is no way to cancel the write itself.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::link::SerialLink;

/// Monotonic identifier of a transmission; unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransmissionId(u64);

impl TransmissionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransmissionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// One outbound write in flight
pub struct TransmissionTask {
    id: TransmissionId,
    created_at: Instant,
    handle: JoinHandle<()>,
}

impl TransmissionTask {
    /// Start writing `payload` to `link` on a new thread.
    ///
    /// Write failures are logged and otherwise ignored; only spawning the
    /// thread can fail.
    pub fn spawn(link: SerialLink, payload: String) -> io::Result<Self> {
        let id = TransmissionId::next();
        let created_at = Instant::now();

        let handle = thread::Builder::new()
            .name(format!("che4c-{id}"))
            .spawn(move || {
                if let Err(e) = link.write_payload(payload.as_bytes()) {
                    tracing::warn!(link = %link.name(), %id, "transmission failed: {e}");
                }
            })?;

        Ok(Self {
            id,
            created_at,
            handle,
        })
    }

    /// Key under which the transceiver tracks this task
    pub fn id(&self) -> TransmissionId {
        self.id
    }

    /// Time since the task was created
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Whether the write has returned (successfully or not)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl fmt::Debug for TransmissionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionTask")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("finished", &self.is_finished())
            .finish()
    }
}
