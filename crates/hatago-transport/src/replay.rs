//! Per-session SSE replay buffer: a bounded ring of recent events so a
//! client that reconnects with `Last-Event-Id` can resume without gaps.

use std::collections::VecDeque;

/// Bounded replay depth per session stream.
pub const DEFAULT_REPLAY_BUFFER_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: u64,
    pub event: String,
    pub data: String,
}

/// A ring buffer of the last `capacity` events sent on one stream.
#[derive(Debug)]
pub struct ReplayBuffer {
    events: VecDeque<StoredEvent>,
    capacity: usize,
    next_id: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_id: 1,
        }
    }

    /// Append an event, assigning it the next monotonic id, and return the
    /// stored copy (for writing to the live stream).
    pub fn push(&mut self, event: impl Into<String>, data: impl Into<String>) -> StoredEvent {
        let stored = StoredEvent {
            id: self.next_id,
            event: event.into(),
            data: data.into(),
        };
        self.next_id += 1;
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(stored.clone());
        stored
    }

    /// Events strictly after `last_event_id`, in original order. If
    /// `last_event_id` has already scrolled out of the buffer, replays
    /// from the oldest event still held (best effort, rather than
    /// erroring).
    pub fn replay_after(&self, last_event_id: u64) -> Vec<StoredEvent> {
        self.events
            .iter()
            .filter(|e| e.id > last_event_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn replays_events_after_given_id() {
        let mut buf = ReplayBuffer::new(10);
        for i in 0..5 {
            buf.push("message", format!("data-{i}"));
        }
        let replayed = buf.replay_after(2);
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].id, 3);
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut buf = ReplayBuffer::new(3);
        for i in 0..5 {
            buf.push("message", format!("data-{i}"));
        }
        let replayed = buf.replay_after(0);
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].id, 3);
        assert_eq!(replayed[2].id, 5);
    }
}
