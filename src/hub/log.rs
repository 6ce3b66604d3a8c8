//! Bounded history of envelopes exchanged with a hub.

use std::time::SystemTime;

use heapless::HistoryBuffer;

use crate::config::MESSAGE_LOG_CAPACITY;
use crate::protocol::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Hub to host.
    Incoming,
    /// Host to hub.
    Outgoing,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub direction: Direction,
    pub at: SystemTime,
    pub message: Message,
}

/// Ring of the last `MESSAGE_LOG_CAPACITY` entries. Oldest are overwritten.
pub struct MessageLog {
    entries: HistoryBuffer<LogEntry, MESSAGE_LOG_CAPACITY>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            entries: HistoryBuffer::new(),
        }
    }

    pub fn record(&mut self, direction: Direction, message: Message) {
        self.entries.write(LogEntry {
            direction,
            at: SystemTime::now(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.recent().is_none()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.recent()
    }

    pub fn clear(&mut self) {
        self.entries = HistoryBuffer::new();
    }
}
