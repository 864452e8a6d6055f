//! Chat message records, as stored in history and sent to clients.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A message in the broadcast stream. Order is stream position; there is no
/// timestamp on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Server notice with no author.
    System { text: String },
    Text {
        author: String,
        avatar: String,
        text: String,
    },
    Image {
        author: String,
        avatar: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
        mime: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Message::System { .. } => None,
            Message::Text { author, .. } | Message::Image { author, .. } => Some(author),
        }
    }
}

/// Standard base64 for binary payloads inside JSON.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
