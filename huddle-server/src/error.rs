//! Edge error types.
//!
//! Policy outcomes (bans, cooldowns, unauthorized admin commands) are not
//! errors; they travel as protocol events. These types only cover input that
//! cannot be decoded at all and configuration that cannot be used.

use thiserror::Error;

/// A client frame that could not be turned into a [`crate::protocol::ClientEvent`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frames are not accepted")]
    Binary,
}

/// Invalid process-start configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("outbound queue size must be at least 1")]
    ZeroOutboundQueue,

    #[error("per-address connection limit must be at least 1")]
    ZeroConnectionLimit,

    #[error("name length limit must be at least 1")]
    ZeroNameLimit,

    #[error("display mode ids must not be empty")]
    EmptyDisplayMode,

    #[error("admin secret must not be blank")]
    BlankAdminSecret,
}
