//! Transceiver
//!
//! Binds one [`SerialLink`] at a time, sends payloads as fire-and-forget
//! transmission tasks, and receives the lines the registry routes to it.
//!
//! A write that is still running once it is older than the staleness
//! threshold means the link has wedged. The next `send` notices this during
//! its sweep, abandons every tracked transmission, and disconnects.
//!
//! Tracked transmissions belong to the transceiver, not to the link they were
//! written on: an explicit `disconnect` or `connect` keeps them, so a write
//! still hung on a released link fails the next `send` all the same.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use super::{
    encode_status_line,
    interpreter::LineInterpreter,
    link::SerialLink,
    registry::TransceiverRegistry,
    transmission::{TransmissionId, TransmissionTask},
    ControlStatus,
};
use crate::config::TransceiverConfig;

/// Connection state of a transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link bound
    Disconnected,
    /// Link bound and registered for polling
    Connected,
}

/// Process-unique transceiver identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransceiverId(u64);

impl TransceiverId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransceiverId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transceiver-{}", self.0)
    }
}

pub(crate) struct TransceiverShared {
    id: TransceiverId,
    registry: Arc<TransceiverRegistry>,
    interpreter: Arc<dyn LineInterpreter>,
    link: RwLock<Option<SerialLink>>,
    transmissions: Mutex<BTreeMap<TransmissionId, TransmissionTask>>,
    stale_after: Duration,
}

impl TransceiverShared {
    pub(crate) fn interpret_lines(&self, data: &str) {
        self.interpreter.interpret_lines(data);
    }

    fn transmissions(&self) -> MutexGuard<'_, BTreeMap<TransmissionId, TransmissionTask>> {
        self.transmissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop `link` and unregister
    fn release(&self, link: SerialLink) {
        link.stop();
        self.registry.unregister(self.id);
        tracing::info!(transceiver = %self.id, link = %link.name(), "disconnected");
    }
}

impl Drop for TransceiverShared {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Send/receive endpoint for one serial connection.
///
/// Cloning yields another handle to the same transceiver.
#[derive(Clone)]
pub struct Transceiver {
    shared: Arc<TransceiverShared>,
}

impl Transceiver {
    /// Create a disconnected transceiver with default settings
    pub fn new(registry: &Arc<TransceiverRegistry>, interpreter: Arc<dyn LineInterpreter>) -> Self {
        Self::with_config(registry, interpreter, &TransceiverConfig::default())
    }

    /// Create a disconnected transceiver
    pub fn with_config(
        registry: &Arc<TransceiverRegistry>,
        interpreter: Arc<dyn LineInterpreter>,
        config: &TransceiverConfig,
    ) -> Self {
        Self {
            shared: Arc::new(TransceiverShared {
                id: TransceiverId::next(),
                registry: registry.clone(),
                interpreter,
                link: RwLock::new(None),
                transmissions: Mutex::new(BTreeMap::new()),
                stale_after: config.stale_after(),
            }),
        }
    }

    /// Process-unique identifier, used as the registry key
    pub fn id(&self) -> TransceiverId {
        self.shared.id
    }

    /// Currently bound link, if any
    pub fn link(&self) -> Option<SerialLink> {
        self.shared
            .link
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether a link is bound
    pub fn is_connected(&self) -> bool {
        self.shared
            .link
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// [`ConnectionState`] view of [`Transceiver::is_connected`]
    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Number of transmissions still tracked
    pub fn pending_transmissions(&self) -> usize {
        self.shared.transmissions().len()
    }

    /// Bind `link`, dropping any previous connection first.
    ///
    /// The link is not checked; a dead device shows up later as failed sends.
    pub fn connect(&self, link: SerialLink) {
        let shared = &self.shared;
        let mut bound = shared
            .link
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = bound.take() {
            shared.release(previous);
        }

        shared
            .registry
            .register(shared.id, link.clone(), Arc::downgrade(shared));
        tracing::info!(transceiver = %shared.id, link = %link.name(), "connected");
        *bound = Some(link);
    }

    /// Stop and unbind the current link. No-op when disconnected.
    pub fn disconnect(&self) {
        let mut bound = self
            .shared
            .link
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(link) = bound.take() {
            self.shared.release(link);
        }
    }

    /// Disconnect only if `expected` is still the bound link, optionally
    /// abandoning every tracked transmission with it
    fn disconnect_from(&self, expected: &SerialLink, abandon: bool) {
        let mut bound = self
            .shared
            .link
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if bound.as_ref() != Some(expected) {
            return;
        }
        if abandon {
            let abandoned = std::mem::take(&mut *self.shared.transmissions());
            tracing::debug!(
                transceiver = %self.shared.id,
                abandoned = abandoned.len(),
                "abandoned tracked transmissions"
            );
        }
        if let Some(link) = bound.take() {
            self.shared.release(link);
        }
    }

    /// Queue `payload` for transmission.
    ///
    /// Returns `true` once the write has been handed to its own thread; the
    /// device may not have received it yet. Returns `false`, leaving the
    /// transceiver disconnected, if an earlier write is stuck or the thread
    /// could not be started. Returns `false` without side effects when not
    /// connected.
    pub fn send(&self, payload: &str) -> bool {
        // held until the task is tracked so a concurrent disconnect either
        // precedes the check or follows the insert
        let bound = self
            .shared
            .link
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(link) = bound.clone() else {
            return false;
        };

        if let Some(stuck) = self.sweep(Instant::now()) {
            drop(bound);
            tracing::warn!(
                transceiver = %self.shared.id,
                link = %link.name(),
                %stuck,
                "transmission stuck past {:?}, dropping link",
                self.shared.stale_after
            );
            self.disconnect_from(&link, true);
            return false;
        }

        match TransmissionTask::spawn(link.clone(), payload.to_owned()) {
            Ok(task) => {
                tracing::debug!(
                    transceiver = %self.shared.id,
                    id = %task.id(),
                    bytes = payload.len(),
                    "transmission accepted"
                );
                self.shared.transmissions().insert(task.id(), task);
                true
            }
            Err(e) => {
                drop(bound);
                tracing::warn!(
                    transceiver = %self.shared.id,
                    link = %link.name(),
                    "failed to start transmission: {e}"
                );
                self.disconnect_from(&link, false);
                false
            }
        }
    }

    /// Send a control status line
    pub fn send_status(&self, status: ControlStatus) -> bool {
        self.send(&encode_status_line(status))
    }

    /// Drop finished transmissions older than the threshold and report the
    /// first one that is still running past it.
    fn sweep(&self, now: Instant) -> Option<TransmissionId> {
        let stale_after = self.shared.stale_after;
        let mut stuck = None;

        self.shared.transmissions().retain(|id, task| {
            if task.age(now) <= stale_after {
                return true;
            }
            if task.is_finished() {
                tracing::trace!(%id, "reclaimed finished transmission");
                return false;
            }
            stuck.get_or_insert(*id);
            true
        });

        stuck
    }
}

impl fmt::Debug for Transceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transceiver")
            .field("id", &self.shared.id)
            .field("link", &self.link())
            .field("pending", &self.pending_transmissions())
            .finish()
    }
}
