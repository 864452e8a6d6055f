//! Bounded replay buffer of recent messages.

use std::collections::VecDeque;

use crate::message::Message;

/// Default number of messages kept for replay.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct HistoryBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append at the tail, evicting from the head once over capacity.
    pub fn append(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(n: usize) -> Message {
        Message::Text {
            author: "alice".into(),
            avatar: String::new(),
            text: format!("msg {n}"),
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut history = HistoryBuffer::new(DEFAULT_CAPACITY);
        for n in 0..=DEFAULT_CAPACITY {
            history.append(text(n));
        }
        let snap = history.snapshot();
        assert_eq!(snap.len(), DEFAULT_CAPACITY);
        assert!(!snap.contains(&text(0)));
        assert_eq!(snap.first(), Some(&text(1)));
        assert_eq!(snap.last(), Some(&text(DEFAULT_CAPACITY)));
    }

    #[test]
    fn snapshot_preserves_arrival_order() {
        let mut history = HistoryBuffer::new(3);
        history.append(text(1));
        history.append(text(2));
        assert_eq!(history.snapshot(), vec![text(1), text(2)]);
    }

    #[test]
    fn clear_empties() {
        let mut history = HistoryBuffer::new(3);
        history.append(text(1));
        history.clear();
        assert!(history.is_empty());
        assert!(history.snapshot().is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut history = HistoryBuffer::new(0);
        history.append(text(1));
        assert_eq!(history.len(), 0);
        assert_eq!(history.capacity(), 0);
    }
}
