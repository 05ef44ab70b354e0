//! Connection handle
//!
//! A [`SerialLink`] is the opaque handle to one open connection with the
//! robot. Clones share the same device; two handles compare equal only if
//! they came from the same open.

use serde::Serialize;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    serial::{configure_port, open_port},
    stream::{CommunicationChannel, SerialChannel},
    ProtocolError, MAX_LINE_LENGTH,
};
use crate::config::LinkConfig;

const READ_CHUNK: usize = 256;

/// Cumulative traffic counters for a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Payloads written in full
    pub tx_messages: u64,
    /// Writes that returned an error
    pub write_errors: u64,
}

#[derive(Default)]
struct Counters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    tx_messages: AtomicU64,
    write_errors: AtomicU64,
}

struct ReadHalf {
    channel: Option<Box<dyn CommunicationChannel>>,
    /// Bytes after the last complete line, held for the next drain
    pending: Vec<u8>,
}

struct LinkInner {
    name: String,
    reader: Mutex<ReadHalf>,
    writer: Mutex<Option<Box<dyn CommunicationChannel>>>,
    stopped: AtomicBool,
    counters: Counters,
}

/// Shared handle to an open serial connection
#[derive(Clone)]
pub struct SerialLink {
    inner: Arc<LinkInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SerialLink {
    /// Open and configure the serial port described by `config`
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        if config.port_name.is_empty() {
            return Err(ProtocolError::ConfigError("no serial port configured".into()));
        }

        let mut port = open_port(
            &config.port_name,
            Some(config.baud_rate),
            Some(Duration::from_millis(config.read_timeout_ms)),
        )?;
        configure_port(port.as_mut(), config.hold_dtr)?;

        tracing::info!(port = %config.port_name, baud = config.baud_rate, "serial link opened");
        Self::from_channel(config.port_name.clone(), Box::new(SerialChannel::new(port)))
    }

    /// Wrap an already-open channel, cloning it for the write half
    pub fn from_channel(
        name: impl Into<String>,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<Self, ProtocolError> {
        let writer = channel.try_clone()?;
        Ok(Self::from_halves(name, channel, writer))
    }

    /// Build a link from independent read and write channels to the same device
    pub fn from_halves(
        name: impl Into<String>,
        reader: Box<dyn CommunicationChannel>,
        writer: Box<dyn CommunicationChannel>,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                name: name.into(),
                reader: Mutex::new(ReadHalf {
                    channel: Some(reader),
                    pending: Vec::new(),
                }),
                writer: Mutex::new(Some(writer)),
                stopped: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Device name this link was opened with
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop the link and release the device.
    ///
    /// The write half is released immediately unless a write is in flight; a
    /// hung write keeps it until that write returns.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut reader = lock(&self.inner.reader);
        reader.channel = None;
        reader.pending.clear();
        drop(reader);

        match self.inner.writer.try_lock() {
            Ok(mut writer) => {
                writer.take();
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                tracing::debug!(link = %self.name(), "write in flight, deferring release");
            }
        }

        tracing::debug!(link = %self.name(), "serial link stopped");
    }

    /// Write one payload in full
    pub fn write_payload(&self, data: &[u8]) -> io::Result<()> {
        if self.is_stopped() {
            return Err(io::Error::new(ErrorKind::NotConnected, "link stopped"));
        }

        let mut writer = lock(&self.inner.writer);
        let Some(channel) = writer.as_mut() else {
            return Err(io::Error::new(ErrorKind::NotConnected, "link stopped"));
        };

        let result = channel.write_all(data).and_then(|_| channel.flush());
        let counters = &self.inner.counters;
        match result {
            Ok(()) => {
                counters.tx_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                counters.tx_messages.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        // stop() could not take the channel while this write was blocked
        if self.is_stopped() {
            writer.take();
        }
        result
    }

    /// Drain everything the device has sent so far, without blocking.
    ///
    /// Returns the complete lines received, terminators included. A trailing
    /// partial line stays buffered until its `\n` arrives, unless it grows
    /// past [`MAX_LINE_LENGTH`], in which case it is flushed as-is.
    pub fn read_available(&self) -> String {
        let mut half = lock(&self.inner.reader);
        let ReadHalf { channel, pending } = &mut *half;
        let Some(channel) = channel.as_mut() else {
            return String::new();
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut received = 0u64;
        loop {
            let available = match channel.bytes_to_read() {
                Ok(0) => break,
                Ok(n) => n as usize,
                Err(e) => {
                    tracing::debug!(link = %self.name(), "bytes_to_read failed: {e}");
                    break;
                }
            };

            let want = available.min(READ_CHUNK);
            match channel.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    received += n as u64;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    break
                }
                Err(e) => {
                    tracing::debug!(link = %self.name(), "read failed: {e}");
                    break;
                }
            }
        }

        self.inner
            .counters
            .rx_bytes
            .fetch_add(received, Ordering::Relaxed);

        let cut = match pending.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None if pending.len() > MAX_LINE_LENGTH => pending.len(),
            None => 0,
        };
        if cut == 0 {
            return String::new();
        }

        let lines: Vec<u8> = pending.drain(..cut).collect();
        tracing::trace!(link = %self.name(), bytes = lines.len(), "drained lines");
        String::from_utf8_lossy(&lines).into_owned()
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> LinkStats {
        let c = &self.inner.counters;
        LinkStats {
            tx_bytes: c.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: c.rx_bytes.load(Ordering::Relaxed),
            tx_messages: c.tx_messages.load(Ordering::Relaxed),
            write_errors: c.write_errors.load(Ordering::Relaxed),
        }
    }
}

impl PartialEq for SerialLink {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SerialLink {}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.inner.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::memory::MemoryChannel;

    fn memory_link(name: &str) -> (SerialLink, crate::protocol::memory::MemoryDevice) {
        let (channel, device) = MemoryChannel::pair();
        let link = SerialLink::from_channel(name, Box::new(channel)).unwrap();
        (link, device)
    }

    #[test]
    fn test_identity_equality() {
        let (a, _dev_a) = memory_link("a");
        let (b, _dev_b) = memory_link("a");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_partial_line_held_back() {
        let (link, device) = memory_link("robot");
        device.push_bytes(b"1\n2");
        assert_eq!(link.read_available(), "1\n");

        device.push_bytes(b"\n");
        assert_eq!(link.read_available(), "2\n");
        assert_eq!(link.read_available(), "");
    }

    #[test]
    fn test_multiple_lines_concatenated() {
        let (link, device) = memory_link("robot");
        device.push_line("3");
        device.push_line("hello");
        assert_eq!(link.read_available(), "3\nhello\n");
        assert_eq!(link.stats().rx_bytes, 8);
    }

    #[test]
    fn test_oversized_partial_flushed() {
        let (link, device) = memory_link("robot");
        let noise = vec![b'x'; MAX_LINE_LENGTH + 1];
        device.push_bytes(&noise);
        assert_eq!(link.read_available().len(), MAX_LINE_LENGTH + 1);
    }

    #[test]
    fn test_write_counts() {
        let (link, device) = memory_link("robot");
        link.write_payload(b"2\n").unwrap();
        assert_eq!(device.received(), b"2\n".to_vec());
        let stats = link.stats();
        assert_eq!(stats.tx_bytes, 2);
        assert_eq!(stats.tx_messages, 1);
    }

    #[test]
    fn test_stopped_link_rejects_io() {
        let (link, device) = memory_link("robot");
        device.push_line("1");
        link.stop();
        assert!(link.is_stopped());
        assert_eq!(link.read_available(), "");
        let err = link.write_payload(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        // second stop is a no-op
        link.stop();
    }
}
