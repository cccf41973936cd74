//! Bounded ring buffer of recent service observations

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: LogLevel,
    pub message: String,
}

/// Oldest entries are dropped once `capacity` is reached. Readers copy a
/// snapshot, so the guardian is never blocked by a slow consumer.
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an observation and mirror it to the tracing subscriber.
    pub fn record(&self, service: &str, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(service = %service, "{}", message),
            LogLevel::Warn => tracing::warn!(service = %service, "{}", message),
            LogLevel::Error => tracing::error!(service = %service, "{}", message),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            service: service.to_string(),
            level,
            message,
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` most recent entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.record("searxng", LogLevel::Info, format!("probe {}", i));
        }

        assert_eq!(buffer.len(), 3);
        let messages: Vec<String> = buffer.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["probe 2", "probe 3", "probe 4"]);
    }

    #[test]
    fn test_recent_limit() {
        let buffer = LogBuffer::new(10);
        buffer.record("a", LogLevel::Info, "one");
        buffer.record("b", LogLevel::Warn, "two");
        buffer.record("c", LogLevel::Error, "three");

        let recent = buffer.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].service, "b");
        assert_eq!(recent[1].level, LogLevel::Error);
        assert!(buffer.recent(0).is_empty());
    }
}
