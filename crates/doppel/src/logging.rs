//! In-memory log ring backing the `GET /logs` endpoint.
//!
//! A `tracing` layer appends every event to a bounded ring; the management
//! plane serves index-based slices of it. The ring is append-only between
//! restarts, capped so long-running processes do not grow without bound.

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const RING_CAPACITY: usize = 1000;

/// One captured log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

struct Ring {
    /// Index of the first retained entry; grows as old entries are evicted.
    base: usize,
    entries: VecDeque<LogEntry>,
}

static RING: Lazy<Mutex<Ring>> = Lazy::new(|| {
    Mutex::new(Ring {
        base: 0,
        entries: VecDeque::with_capacity(RING_CAPACITY),
    })
});

fn push(entry: LogEntry) {
    let mut ring = RING.lock();
    if ring.entries.len() == RING_CAPACITY {
        ring.entries.pop_front();
        ring.base += 1;
    }
    ring.entries.push_back(entry);
}

/// Slice of the ring between absolute indexes `[start, end]` inclusive,
/// clamped to what is still retained.
pub fn slice(start: usize, end: usize) -> Vec<LogEntry> {
    let ring = RING.lock();
    let lo = start.max(ring.base) - ring.base;
    let hi = end
        .saturating_add(1)
        .saturating_sub(ring.base)
        .min(ring.entries.len());
    if lo >= hi {
        return Vec::new();
    }
    ring.entries.range(lo..hi).cloned().collect()
}

/// Total entries ever observed (retained or evicted).
pub fn count() -> usize {
    let ring = RING.lock();
    ring.base + ring.entries.len()
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Tracing layer that mirrors events into the ring.
pub struct RingLayer;

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        push(LogEntry {
            level: event.metadata().level().to_string().to_lowercase(),
            message: visitor.message,
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_slice() {
        let before = count();
        push(LogEntry {
            level: "info".into(),
            message: "first".into(),
            timestamp: Utc::now().to_rfc3339(),
        });
        push(LogEntry {
            level: "warn".into(),
            message: "second".into(),
            timestamp: Utc::now().to_rfc3339(),
        });
        let entries = slice(before, before + 1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn test_slice_out_of_range() {
        let total = count();
        assert!(slice(total + 100, total + 200).is_empty());
    }
}
