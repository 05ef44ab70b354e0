//! Transceiver registry
//!
//! Routes inbound data to transceivers by link. A transceiver is present
//! exactly while it has a link bound; `connect` and `disconnect` keep the
//! registry in step, and dropping a transceiver removes it.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::{
    link::SerialLink,
    transceiver::{Transceiver, TransceiverId, TransceiverShared},
};

struct Entry {
    id: TransceiverId,
    link: SerialLink,
    transceiver: Weak<TransceiverShared>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.transceiver.strong_count() > 0
    }
}

/// Set of connected transceivers, shared by the transceivers and the poller
#[derive(Default)]
pub struct TransceiverRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl TransceiverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(
        &self,
        id: TransceiverId,
        link: SerialLink,
        transceiver: Weak<TransceiverShared>,
    ) {
        let mut entries = self.write();
        entries.retain(|e| e.id != id && e.is_live());
        entries.push(Entry {
            id,
            link,
            transceiver,
        });
    }

    pub(crate) fn unregister(&self, id: TransceiverId) {
        self.write().retain(|e| e.id != id && e.is_live());
    }

    /// Number of connected transceivers
    pub fn len(&self) -> usize {
        self.read().iter().filter(|e| e.is_live()).count()
    }

    /// Whether no live transceiver is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `transceiver` is registered (that is, connected)
    pub fn contains(&self, transceiver: &Transceiver) -> bool {
        let id = transceiver.id();
        self.read().iter().any(|e| e.id == id && e.is_live())
    }

    /// Run one poll cycle on `link`.
    ///
    /// Drains whatever the device has sent and hands it to every transceiver
    /// bound to `link`. Never blocks waiting for data. Returns the number of
    /// transceivers reached; `None` is a no-op.
    pub fn poll(&self, link: Option<&SerialLink>) -> usize {
        let Some(link) = link else {
            return 0;
        };

        let data = link.read_available();
        self.dispatch(link, &data)
    }

    /// Hand `data` to every transceiver bound to `link`
    pub fn dispatch(&self, link: &SerialLink, data: &str) -> usize {
        // Upgrade under the lock, call out after releasing it: interpreters
        // may send or disconnect, and a dropped transceiver unregisters itself.
        let receivers: Vec<_> = {
            let entries = self.read();
            entries
                .iter()
                .filter(|e| e.link == *link)
                .filter_map(|e| e.transceiver.upgrade())
                .collect()
        };

        for receiver in &receivers {
            receiver.interpret_lines(data);
        }
        receivers.len()
    }
}
