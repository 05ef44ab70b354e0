//! Line interpretation
//!
//! The transceiver hands each poll cycle's text to a [`LineInterpreter`]
//! chosen at construction. [`StatusInterpreter`] is the one the robot host
//! uses: integer lines are control status updates, anything else is passed to
//! an optional message handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use super::status::ControlStatus;

/// Decodes application messages out of the raw text of one poll cycle
pub trait LineInterpreter: Send + Sync {
    /// Called once per poll cycle with everything drained from the link
    fn interpret_lines(&self, data: &str);
}

impl<F> LineInterpreter for F
where
    F: Fn(&str) + Send + Sync,
{
    fn interpret_lines(&self, data: &str) {
        self(data)
    }
}

type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Tracks the controller's reported [`ControlStatus`]
pub struct StatusInterpreter {
    /// Text after the last `\n` seen so far
    carry: Mutex<String>,
    status: watch::Sender<Option<ControlStatus>>,
    unknown_codes: AtomicU64,
    on_message: Option<MessageHandler>,
}

impl Default for StatusInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusInterpreter {
    /// Interpreter with no status seen yet
    pub fn new() -> Self {
        let (status, _) = watch::channel(None);
        Self {
            carry: Mutex::new(String::new()),
            status,
            unknown_codes: AtomicU64::new(0),
            on_message: None,
        }
    }

    /// Receive every non-status line
    #[must_use]
    pub fn with_message_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(handler));
        self
    }

    /// Last status reported by the controller
    pub fn current(&self) -> Option<ControlStatus> {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<Option<ControlStatus>> {
        self.status.subscribe()
    }

    /// Number of integer lines that matched no known status
    pub fn unknown_codes(&self) -> u64 {
        self.unknown_codes.load(Ordering::Relaxed)
    }

    fn interpret_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match line.parse::<i64>() {
            Ok(code) => match ControlStatus::from_code(code) {
                Some(status) => {
                    let previous = self.status.send_replace(Some(status));
                    if previous != Some(status) {
                        tracing::debug!(%status, "controller status changed");
                    }
                }
                None => {
                    self.unknown_codes.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(code, "unknown control status code");
                }
            },
            Err(_) => match &self.on_message {
                Some(handler) => handler(line),
                None => tracing::trace!(line, "unhandled controller line"),
            },
        }
    }
}

impl LineInterpreter for StatusInterpreter {
    fn interpret_lines(&self, data: &str) {
        let complete = {
            let mut carry = self.carry.lock().unwrap_or_else(|p| p.into_inner());
            carry.push_str(data);
            match carry.rfind('\n') {
                Some(idx) => carry.drain(..=idx).collect::<String>(),
                None => return,
            }
        };

        for line in complete.lines() {
            self.interpret_line(line);
        }
    }
}
