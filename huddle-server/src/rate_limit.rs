//! Per-connection cooldowns for text and image submissions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

#[derive(Debug)]
pub struct RateLimiter {
    text_cooldown: Duration,
    image_cooldown: Duration,
    /// Last allowed action per (connection, class).
    last_allowed: HashMap<(ConnectionId, MessageClass), Instant>,
}

impl RateLimiter {
    pub fn new(text_cooldown: Duration, image_cooldown: Duration) -> Self {
        Self {
            text_cooldown,
            image_cooldown,
            last_allowed: HashMap::new(),
        }
    }

    pub fn cooldown(&self, class: MessageClass) -> Duration {
        match class {
            MessageClass::Text => self.text_cooldown,
            MessageClass::Image => self.image_cooldown,
        }
    }

    /// Check the cooldown and, when allowed, restart it at `now`.
    pub fn try_consume(&mut self, conn: ConnectionId, class: MessageClass, now: Instant) -> Decision {
        let cooldown = self.cooldown(class);
        if let Some(last) = self.last_allowed.get(&(conn, class))
            && now.saturating_duration_since(*last) < cooldown
        {
            return Decision::Denied;
        }
        self.last_allowed.insert((conn, class), now);
        Decision::Allowed
    }

    pub fn forget(&mut self, conn: ConnectionId) {
        self.last_allowed.retain(|(id, _), _| *id != conn);
    }

    #[cfg(test)]
    fn tracked_connections(&self) -> usize {
        let mut ids: Vec<_> = self.last_allowed.keys().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}
