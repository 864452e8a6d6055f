//! Single task owning the [`SessionController`].
//!
//! Connection tasks submit [`Command`]s through a cloneable [`ChatHandle`];
//! the dispatcher applies them one at a time, in arrival order. That order is
//! the total order every client observes.

use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broadcast::Frame;
use crate::controller::{SessionController, Stats};
use crate::protocol::ClientEvent;
use crate::registry::ConnectionId;

const COMMAND_QUEUE: usize = 4096;

#[derive(Debug)]
pub enum Command {
    Connect {
        id: ConnectionId,
        address: IpAddr,
        outbound: mpsc::Sender<Frame>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Client {
        id: ConnectionId,
        event: ClientEvent,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
}

/// Cheap handle for submitting commands to the dispatcher.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    tx: mpsc::Sender<Command>,
}

impl ChatHandle {
    pub async fn connect(&self, id: ConnectionId, address: IpAddr, outbound: mpsc::Sender<Frame>) {
        self.submit(Command::Connect { id, address, outbound }).await;
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.submit(Command::Disconnect { id }).await;
    }

    pub async fn client_event(&self, id: ConnectionId, event: ClientEvent) {
        self.submit(Command::Client { id, event }).await;
    }

    /// `None` once the dispatcher has stopped.
    pub async fn stats(&self) -> Option<Stats> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats { reply }).await;
        rx.await.ok()
    }

    async fn submit(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            tracing::warn!("dispatcher stopped, command dropped");
        }
    }
}

/// Start the dispatcher task. It runs until every [`ChatHandle`] is dropped.
pub fn spawn(controller: SessionController) -> (ChatHandle, JoinHandle<SessionController>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(run(controller, rx));
    (ChatHandle { tx }, task)
}

async fn run(mut controller: SessionController, mut rx: mpsc::Receiver<Command>) -> SessionController {
    while let Some(command) = rx.recv().await {
        apply(&mut controller, command, Instant::now());
    }
    tracing::debug!("dispatcher finished");
    controller
}

/// Apply one command to completion.
pub fn apply(controller: &mut SessionController, command: Command, now: Instant) {
    match command {
        Command::Connect { id, address, outbound } => {
            controller.connect(id, address, outbound);
        }
        Command::Disconnect { id } => {
            controller.disconnect(id);
        }
        Command::Client { id, event } => handle_client_event(controller, id, event, now),
        Command::Stats { reply } => {
            let _ = reply.send(controller.stats());
        }
    }
}

fn handle_client_event(controller: &mut SessionController, id: ConnectionId, event: ClientEvent, now: Instant) {
    match event {
        ClientEvent::Join { name, avatar } => {
            controller.join(id, &name, &avatar);
        }
        ClientEvent::ChatMessage { text, ack } => {
            let ok = controller.chat_message(id, &text, now);
            if let Some(ack) = ack {
                controller.acknowledge(id, ack, ok);
            }
        }
        ClientEvent::ImageMessage { data, mime, ack } => {
            let ok = controller.image_message(id, data, &mime, now);
            if let Some(ack) = ack {
                controller.acknowledge(id, ack, ok);
            }
        }
        ClientEvent::AdminVerify { credential, ack } => {
            let ok = controller.admin_verify(id, &credential);
            if let Some(ack) = ack {
                controller.acknowledge(id, ack, ok);
            }
        }
        ClientEvent::AdminClearChat => controller.admin_clear_chat(id),
        ClientEvent::AdminToggleMode { mode, enabled } => controller.admin_toggle_mode(id, &mode, enabled),
        ClientEvent::AdminBanUser { name } => controller.admin_ban_user(id, &name),
        ClientEvent::AdminUnbanUser { name } => controller.admin_unban_user(id, &name),
    }
}
