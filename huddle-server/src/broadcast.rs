//! Event fan-out to connected clients.
//!
//! Each connection owns a bounded queue of serialized frames. Delivery is
//! `try_send`: a full or closed queue loses the frame and the dispatcher
//! moves on.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::ServerEvent;
use crate::registry::ConnectionId;

/// A serialized [`ServerEvent`], shared between every recipient of a broadcast.
pub type Frame = Arc<str>;

#[derive(Debug, Default)]
pub struct BroadcastBus {
    outbound: HashMap<ConnectionId, mpsc::Sender<Frame>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, id: ConnectionId, sender: mpsc::Sender<Frame>) {
        self.outbound.insert(id, sender);
    }

    /// Drop the connection's sender. The transport drains whatever is queued
    /// and then closes the socket.
    pub fn detach(&mut self, id: ConnectionId) -> bool {
        self.outbound.remove(&id).is_some()
    }

    pub fn broadcast_all(&self, event: &ServerEvent) {
        self.broadcast_to(|_| true, event);
    }

    pub fn send_to(&self, id: ConnectionId, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        if let Some(tx) = self.outbound.get(&id) {
            deliver(id, tx, frame);
        }
    }

    /// Serialize once and deliver to every attached connection accepted by `filter`.
    pub fn broadcast_to(&self, filter: impl Fn(ConnectionId) -> bool, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        let mut recipients = 0u32;
        for (id, tx) in &self.outbound {
            if filter(*id) {
                recipients += 1;
                deliver(*id, tx, Arc::clone(&frame));
            }
        }
        debug!(recipients, "broadcast event");
    }

    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            None
        }
    }
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<Frame>, frame: Frame) {
    match tx.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(conn = %id, "outbound queue full, dropping frame");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(conn = %id, "outbound queue closed");
        }
    }
}
