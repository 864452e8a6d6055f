//! WebSocket wire protocol: one JSON object per text frame, tagged by `type`.

use std::net::IpAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{Message, base64_bytes};

/// Events a client submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join {
        #[serde(default)]
        name: String,
        #[serde(default)]
        avatar: String,
    },
    ChatMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    ImageMessage {
        #[serde(with = "base64_bytes")]
        data: Bytes,
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    AdminVerify {
        credential: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    AdminClearChat,
    AdminToggleMode { mode: String, enabled: bool },
    AdminBanUser { name: String },
    AdminUnbanUser { name: String },
}

impl ClientEvent {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// One row of the administrator ban view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub name: String,
    pub address: Option<IpAddr>,
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Online { count: usize },
    Message { message: Message },
    History { messages: Vec<Message> },
    Banned { reason: String },
    ClearChat,
    ModeToggle { mode: String, enabled: bool },
    BanListUpdate { entries: Vec<BanEntry> },
    Ack { id: u64, success: bool },
}
