//! Process-start configuration.

use std::time::Duration;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::error::ConfigError;

#[derive(Debug, Clone, Parser)]
#[command(name = "huddle-server", about = "Broadcast chat server")]
pub struct ServerConfig {
    /// Address for the HTTP/WebSocket listener.
    #[arg(long, env = "HUDDLE_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Number of messages replayed to new joiners.
    #[arg(long, env = "HUDDLE_HISTORY_CAPACITY", default_value_t = 100)]
    pub history_capacity: usize,

    /// Minimum gap between two text messages from one connection.
    #[arg(long, env = "HUDDLE_TEXT_COOLDOWN_MS", default_value_t = 1500)]
    pub text_cooldown_ms: u64,

    /// Minimum gap between two images from one connection.
    #[arg(long, env = "HUDDLE_IMAGE_COOLDOWN_MS", default_value_t = 3000)]
    pub image_cooldown_ms: u64,

    /// Shared administrator credential. Admin verification always fails when unset.
    #[arg(long, env = "HUDDLE_ADMIN_SECRET", hide_env_values = true)]
    pub admin_secret: Option<String>,

    /// Do not announce administrators joining or leaving.
    #[arg(long, env = "HUDDLE_HIDE_ADMIN_PRESENCE")]
    pub hide_admin_presence: bool,

    /// Display modes administrators may toggle.
    #[arg(
        long,
        env = "HUDDLE_DISPLAY_MODES",
        value_delimiter = ',',
        default_values_t = [String::from("chaos"), String::from("tempo")]
    )]
    pub display_modes: Vec<String>,

    /// Longest accepted text message, in characters (after trimming).
    #[arg(long, env = "HUDDLE_MAX_TEXT_CHARS", default_value_t = 2000)]
    pub max_text_chars: usize,

    /// Longest display name, in characters. Longer names are cut to this length.
    #[arg(long, env = "HUDDLE_MAX_NAME_CHARS", default_value_t = 32)]
    pub max_name_chars: usize,

    /// Longest avatar URL, in characters. Longer values are dropped.
    #[arg(long, env = "HUDDLE_MAX_AVATAR_CHARS", default_value_t = 2048)]
    pub max_avatar_chars: usize,

    /// Largest accepted image, in decoded bytes.
    #[arg(long, env = "HUDDLE_MAX_IMAGE_BYTES", default_value_t = 5 * 1024 * 1024)]
    pub max_image_bytes: usize,

    /// Concurrent sockets allowed from a single address.
    #[arg(long, env = "HUDDLE_MAX_CONNECTIONS_PER_IP", default_value_t = 20)]
    pub max_connections_per_ip: u32,

    /// Resolve client addresses from the first `X-Forwarded-For` entry.
    /// Only enable behind a reverse proxy that sets the header.
    #[arg(long, env = "HUDDLE_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Directory with the static web client.
    #[arg(long, env = "HUDDLE_WEB_STATIC_DIR")]
    pub web_static_dir: Option<String>,

    /// Frames buffered per connection before new ones are dropped.
    #[arg(long, env = "HUDDLE_OUTBOUND_QUEUE", default_value_t = 256)]
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            history_capacity: 100,
            text_cooldown_ms: 1500,
            image_cooldown_ms: 3000,
            admin_secret: None,
            hide_admin_presence: false,
            display_modes: vec!["chaos".to_string(), "tempo".to_string()],
            max_text_chars: 2000,
            max_name_chars: 32,
            max_avatar_chars: 2048,
            max_image_bytes: 5 * 1024 * 1024,
            max_connections_per_ip: 20,
            trust_forwarded_for: false,
            web_static_dir: None,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Parse the command line and environment. `PORT` supplies the listen
    /// port when neither `--listen-addr` nor `HUDDLE_LISTEN_ADDR` is set.
    pub fn load() -> Self {
        let matches = Self::command().get_matches();
        let port = std::env::var("PORT").ok();
        Self::from_matches(&matches, port.as_deref()).unwrap_or_else(|e| e.exit())
    }

    fn from_matches(matches: &ArgMatches, port: Option<&str>) -> Result<Self, clap::Error> {
        let mut config = Self::from_arg_matches(matches)?;
        if matches.value_source("listen_addr") == Some(ValueSource::DefaultValue)
            && let Some(port) = port
        {
            match port.trim().parse::<u16>() {
                Ok(port) => config.listen_addr = format!("0.0.0.0:{port}"),
                Err(_) => tracing::warn!(port, "ignoring unparseable PORT"),
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroOutboundQueue);
        }
        if self.max_connections_per_ip == 0 {
            return Err(ConfigError::ZeroConnectionLimit);
        }
        if self.max_name_chars == 0 {
            return Err(ConfigError::ZeroNameLimit);
        }
        if self.display_modes.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::EmptyDisplayMode);
        }
        if self.admin_secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ConfigError::BlankAdminSecret);
        }
        Ok(())
    }

    pub fn text_cooldown(&self) -> Duration {
        Duration::from_millis(self.text_cooldown_ms)
    }

    pub fn image_cooldown(&self) -> Duration {
        Duration::from_millis(self.image_cooldown_ms)
    }

    /// Largest WebSocket frame worth reading: a base64 image plus envelope.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_image_bytes.div_ceil(3) * 4 + 4096
    }
}
