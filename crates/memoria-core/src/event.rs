//! Bounded event log (C10) consumed by the dashboard's live stream.
//!
//! A fixed-capacity ring buffer behind a `Mutex`: no ring-buffer crate exists
//! anywhere in this project's dependency stack, and the buffer is small and
//! simple enough that pulling one in (`ringbuf`, etc.) would be exactly the
//! kind of needless dependency the project avoids elsewhere. `VecDeque` with
//! a truncate-on-push discipline is the idiomatic choice.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_CAPACITY: usize = 256;

/// One recorded operation outcome, success or error kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub profile: String,
    pub operation: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn success(profile: &str, operation: &str) -> Self {
        Self {
            profile: profile.to_string(),
            operation: operation.to_string(),
            outcome: "success".to_string(),
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn error(profile: &str, operation: &str, kind: &str) -> Self {
        Self {
            profile: profile.to_string(),
            operation: operation.to_string(),
            outcome: "error".to_string(),
            detail: Some(kind.to_string()),
            occurred_at: Utc::now(),
        }
    }
}

/// Last-K event ring buffer, truncated on push.
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, event: Event) {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The last `limit` events, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let log = EventLog::new(2);
        log.push(Event::success("default", "add"));
        log.push(Event::success("default", "get"));
        log.push(Event::success("default", "delete"));
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].operation, "delete");
        assert_eq!(recent[1].operation, "get");
    }

    #[test]
    fn recent_returns_most_recent_first() {
        let log = EventLog::new(10);
        log.push(Event::success("default", "first"));
        log.push(Event::error("default", "second", "validation"));
        let recent = log.recent(10);
        assert_eq!(recent[0].operation, "second");
        assert_eq!(recent[0].outcome, "error");
        assert_eq!(recent[1].operation, "first");
    }
}
