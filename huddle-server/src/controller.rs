//! Per-connection state machine over the shared chat state.
//!
//! `Unadmitted → Admitted → Identified → Disconnected`. Every method runs to
//! completion on `&mut self`; the dispatcher guarantees only one runs at a
//! time, so check-then-update sequences need no locking.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::admin::AdminAuthority;
use crate::broadcast::{BroadcastBus, Frame};
use crate::config::ServerConfig;
use crate::history::HistoryBuffer;
use crate::message::Message;
use crate::moderation::{ModerationStore, identity_key};
use crate::protocol::ServerEvent;
use crate::rate_limit::{Decision, MessageClass, RateLimiter};
use crate::registry::{ConnectionId, ConnectionRegistry, RejectReason};

const KICK_NOTICE: &str = "You have been banned.";
const CLEARED_NOTICE: &str = "Chat was cleared by admin.";

#[derive(Debug, Clone)]
struct ChatPolicy {
    hide_admin_presence: bool,
    display_modes: HashSet<String>,
    max_text_chars: usize,
    max_image_bytes: usize,
    max_name_chars: usize,
    max_avatar_chars: usize,
}

impl ChatPolicy {
    /// Trimmed name, cut to the configured length.
    fn clamp_name<'a>(&self, name: &'a str) -> &'a str {
        let name = name.trim();
        match name.char_indices().nth(self.max_name_chars) {
            Some((end, _)) => name[..end].trim_end(),
            None => name,
        }
    }

    /// Oversized avatars are dropped, not cut.
    fn clamp_avatar<'a>(&self, avatar: &'a str) -> &'a str {
        if avatar.chars().count() > self.max_avatar_chars {
            ""
        } else {
            avatar
        }
    }
}

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub online: usize,
    pub history: usize,
    pub banned: usize,
}

#[derive(Debug)]
pub struct SessionController {
    moderation: ModerationStore,
    history: HistoryBuffer,
    registry: ConnectionRegistry,
    rate_limiter: RateLimiter,
    bus: BroadcastBus,
    admin: AdminAuthority,
    policy: ChatPolicy,
}

impl SessionController {
    pub fn new(config: &ServerConfig) -> Self {
        let admin = AdminAuthority::new(config.admin_secret.as_deref());
        if !admin.is_enabled() {
            warn!("no admin secret configured; admin commands are disabled");
        }
        Self {
            moderation: ModerationStore::new(),
            history: HistoryBuffer::new(config.history_capacity),
            registry: ConnectionRegistry::new(),
            rate_limiter: RateLimiter::new(config.text_cooldown(), config.image_cooldown()),
            bus: BroadcastBus::new(),
            admin,
            policy: ChatPolicy {
                hide_admin_presence: config.hide_admin_presence,
                display_modes: config.display_modes.iter().map(|m| m.trim().to_string()).collect(),
                max_text_chars: config.max_text_chars,
                max_image_bytes: config.max_image_bytes,
                max_name_chars: config.max_name_chars,
                max_avatar_chars: config.max_avatar_chars,
            },
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Admit a new connection. A banned address gets a ban notice and its
    /// outbound channel is closed straight away.
    pub fn connect(&mut self, id: ConnectionId, address: IpAddr, sender: mpsc::Sender<Frame>) -> bool {
        self.bus.attach(id, sender);
        let admitted = self.registry.admit(id, address, &self.moderation).map(|_| ());
        match admitted {
            Ok(_) => {
                info!(conn = %id, %address, "connection admitted");
                self.broadcast_online();
                true
            }
            Err(reason) => {
                warn!(conn = %id, %address, "connection rejected: address banned");
                if let Some(notice) = reason.ban_notice() {
                    self.bus.send_to(id, &ServerEvent::Banned { reason: notice.to_string() });
                }
                self.bus.detach(id);
                false
            }
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.bus.detach(id);
        let Some(session) = self.registry.remove(id) else {
            return false;
        };
        self.rate_limiter.forget(id);

        if let Some(identity) = &session.identity
            && !(session.is_admin && self.policy.hide_admin_presence)
        {
            self.announce(format!("{} left the chat.", identity.name));
        }
        self.broadcast_online();
        info!(
            conn = %id,
            name = session.name().unwrap_or("-"),
            online = self.registry.len(),
            "connection closed"
        );
        true
    }

    /// Send a ban notice, then disconnect.
    fn force_disconnect(&mut self, id: ConnectionId, reason: &str) {
        self.bus.send_to(id, &ServerEvent::Banned { reason: reason.to_string() });
        self.disconnect(id);
    }

    // ── Join ──────────────────────────────────────────────────────────

    pub fn join(&mut self, id: ConnectionId, name: &str, avatar: &str) -> bool {
        let name = self.policy.clamp_name(name);
        let avatar = self.policy.clamp_avatar(avatar);
        let bound = self
            .registry
            .bind(id, name, avatar, &mut self.moderation)
            .map(|s| (s.name().unwrap_or_default().to_string(), s.is_admin));
        let (name, is_admin) = match bound {
            Ok(bound) => bound,
            Err(RejectReason::IdentityBanned) => {
                warn!(conn = %id, name, "join rejected: username banned");
                if let Some(notice) = RejectReason::IdentityBanned.ban_notice() {
                    self.force_disconnect(id, notice);
                }
                return false;
            }
            Err(reason) => {
                debug!(conn = %id, ?reason, "join ignored");
                return false;
            }
        };

        info!(conn = %id, %name, admin = is_admin, "joined");
        if !(is_admin && self.policy.hide_admin_presence) {
            self.announce(format!("{name} joined the chat!"));
        }
        if !self.history.is_empty() {
            self.bus.send_to(
                id,
                &ServerEvent::History {
                    messages: self.history.snapshot(),
                },
            );
        }
        if is_admin {
            self.send_ban_list(id);
        }
        true
    }

    // ── Submissions ───────────────────────────────────────────────────

    pub fn chat_message(&mut self, id: ConnectionId, text: &str, now: Instant) -> bool {
        let Some((author, avatar)) = self.author(id) else {
            return false;
        };
        let text = text.trim();
        if text.is_empty() || text.chars().count() > self.policy.max_text_chars {
            debug!(conn = %id, "text rejected: empty or too long");
            return false;
        }
        if self.rate_limiter.try_consume(id, MessageClass::Text, now) == Decision::Denied {
            debug!(conn = %id, "text rejected: cooldown");
            return false;
        }
        self.publish(Message::Text {
            author,
            avatar,
            text: text.to_string(),
        });
        true
    }

    pub fn image_message(&mut self, id: ConnectionId, data: Bytes, mime: &str, now: Instant) -> bool {
        let Some((author, avatar)) = self.author(id) else {
            return false;
        };
        let mime = mime.trim();
        if data.is_empty() || data.len() > self.policy.max_image_bytes || !mime.starts_with("image/") {
            debug!(conn = %id, bytes = data.len(), mime, "image rejected: malformed");
            return false;
        }
        if self.rate_limiter.try_consume(id, MessageClass::Image, now) == Decision::Denied {
            debug!(conn = %id, "image rejected: cooldown");
            return false;
        }
        self.publish(Message::Image {
            author,
            avatar,
            data,
            mime: mime.to_string(),
        });
        true
    }

    /// Direct acknowledgment to the submitter only.
    pub fn acknowledge(&self, id: ConnectionId, ack: u64, success: bool) {
        self.bus.send_to(id, &ServerEvent::Ack { id: ack, success });
    }

    // ── Administration ────────────────────────────────────────────────

    pub fn admin_verify(&mut self, id: ConnectionId, credential: &str) -> bool {
        let Some(session) = self.registry.get_mut(id) else {
            return false;
        };
        if !self.admin.verify(session, credential) {
            warn!(conn = %id, "admin verification failed");
            return false;
        }
        info!(conn = %id, name = session.name().unwrap_or("-"), "admin verified");
        self.send_ban_list(id);
        true
    }

    pub fn admin_clear_chat(&mut self, id: ConnectionId) {
        if !self.is_admin(id) {
            return;
        }
        info!(conn = %id, cleared = self.history.len(), "history cleared");
        self.history.clear();
        self.bus.broadcast_all(&ServerEvent::ClearChat);
        self.announce(CLEARED_NOTICE.to_string());
    }

    pub fn admin_toggle_mode(&mut self, id: ConnectionId, mode: &str, enabled: bool) {
        if !self.is_admin(id) {
            return;
        }
        if !self.policy.display_modes.contains(mode) {
            debug!(conn = %id, mode, "unknown display mode");
            return;
        }
        info!(conn = %id, mode, enabled, "display mode toggled");
        self.bus.broadcast_all(&ServerEvent::ModeToggle {
            mode: mode.to_string(),
            enabled,
        });
    }

    pub fn admin_ban_user(&mut self, id: ConnectionId, name: &str) {
        if !self.is_admin(id) {
            return;
        }
        let name = self.policy.clamp_name(name);
        let key = identity_key(name);
        if key.is_empty() {
            return;
        }

        let address = self.moderation.ban_identity(&key);
        info!(conn = %id, banned = %key, address = ?address, "username banned");
        self.announce(format!("Admin banned username \"{name}\" (and associated IP)."));

        for target in self.registry.find(|s| s.key() == Some(key.as_str())) {
            self.force_disconnect(target, KICK_NOTICE);
        }
        self.send_ban_list_to_admins();
    }

    pub fn admin_unban_user(&mut self, id: ConnectionId, name: &str) {
        if !self.is_admin(id) {
            return;
        }
        let name = self.policy.clamp_name(name);
        let key = identity_key(name);
        if key.is_empty() {
            return;
        }

        let address = self.moderation.unban_identity(&key);
        info!(conn = %id, unbanned = %key, address = ?address, "username unbanned");
        self.announce(format!("Admin unbanned username \"{name}\" (and associated IP)."));
        self.send_ban_list_to_admins();
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn online_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            online: self.registry.len(),
            history: self.history.len(),
            banned: self.moderation.banned_identity_count(),
        }
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn moderation(&self) -> &ModerationStore {
        &self.moderation
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn is_admin(&self, id: ConnectionId) -> bool {
        self.registry.get(id).is_some_and(|s| self.admin.is_admin(s))
    }

    /// Author fields of an identified session.
    fn author(&self, id: ConnectionId) -> Option<(String, String)> {
        let identity = self.registry.get(id)?.identity.as_ref()?;
        Some((identity.name.clone(), identity.avatar.clone()))
    }

    fn publish(&mut self, message: Message) {
        self.history.append(message.clone());
        self.bus.broadcast_all(&ServerEvent::Message { message });
    }

    /// System notices are broadcast but not kept in history.
    fn announce(&self, text: String) {
        self.bus.broadcast_all(&ServerEvent::Message {
            message: Message::system(text),
        });
    }

    fn broadcast_online(&self) {
        self.bus.broadcast_all(&ServerEvent::Online {
            count: self.registry.len(),
        });
    }

    fn send_ban_list(&self, id: ConnectionId) {
        self.bus.send_to(
            id,
            &ServerEvent::BanListUpdate {
                entries: self.moderation.list_bans(),
            },
        );
    }

    fn send_ban_list_to_admins(&self) {
        let admins: HashSet<ConnectionId> = self.registry.find(|s| self.admin.is_admin(s)).into_iter().collect();
        if admins.is_empty() {
            return;
        }
        self.bus.broadcast_to(
            |id| admins.contains(&id),
            &ServerEvent::BanListUpdate {
                entries: self.moderation.list_bans(),
            },
        );
    }
}
