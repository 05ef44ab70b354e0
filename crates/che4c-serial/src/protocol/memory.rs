//! In-memory channel
//!
//! Stands in for the robot when no hardware is attached. [`MemoryChannel`] is
//! the host end, [`MemoryDevice`] the controller end. The device side can
//! stall writes to reproduce a wedged USB-serial adapter.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::stream::CommunicationChannel;

#[derive(Default)]
struct Shared {
    /// device -> host
    inbound: Mutex<VecDeque<u8>>,
    /// host -> device
    outbound: Mutex<Vec<u8>>,
    stalled: Mutex<bool>,
    resume: Condvar,
    fail_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host end of an in-memory connection
#[derive(Clone)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
}

/// Controller end of an in-memory connection
pub struct MemoryDevice {
    shared: Arc<Shared>,
}

impl MemoryChannel {
    /// Create a connected host/device pair
    pub fn pair() -> (MemoryChannel, MemoryDevice) {
        let shared = Arc::new(Shared::default());
        (
            MemoryChannel {
                shared: shared.clone(),
            },
            MemoryDevice { shared },
        )
    }
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = lock(&self.shared.inbound);
        if inbound.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stalled = lock(&self.shared.stalled);
        while *stalled {
            stalled = self
                .shared
                .resume
                .wait(stalled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        drop(stalled);

        if self.shared.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        }
        lock(&self.shared.outbound).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MemoryChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(lock(&self.shared.inbound).len() as u32)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }
}

impl MemoryDevice {
    /// Queue raw bytes for the host to read
    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.shared.inbound).extend(bytes.iter().copied());
    }

    /// Queue one `\n`-terminated line for the host to read
    pub fn push_line(&self, line: &str) {
        let mut inbound = lock(&self.shared.inbound);
        inbound.extend(line.as_bytes().iter().copied());
        inbound.push_back(b'\n');
    }

    /// Everything the host has written so far
    pub fn received(&self) -> Vec<u8> {
        lock(&self.shared.outbound).clone()
    }

    /// Host output decoded as text
    pub fn received_string(&self) -> String {
        String::from_utf8_lossy(&self.received()).into_owned()
    }

    /// Block every host write until [`resume_writes`](Self::resume_writes)
    pub fn stall_writes(&self) {
        *lock(&self.shared.stalled) = true;
    }

    /// Release stalled writes
    pub fn resume_writes(&self) {
        *lock(&self.shared.stalled) = false;
        self.shared.resume.notify_all();
    }

    /// Make host writes fail as if the cable were pulled
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Release);
    }
}

impl Drop for MemoryDevice {
    fn drop(&mut self) {
        // Nobody is left to unstall the host
        self.resume_writes();
    }
}
