//! Live sessions, one per admitted connection.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::moderation::{ModerationStore, identity_key};

/// Display name used when a client joins with a blank one.
pub const PLACEHOLDER_NAME: &str = "Anonymous";

/// Opaque connection identifier, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity fields populated by a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    /// Lower-cased `name`, used for every moderation comparison.
    pub key: String,
    pub avatar: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnectionId,
    pub address: IpAddr,
    pub identity: Option<Identity>,
    /// Set only by successful credential verification.
    pub is_admin: bool,
}

impl Session {
    fn new(id: ConnectionId, address: IpAddr) -> Self {
        Self {
            id,
            address,
            identity: None,
            is_admin: false,
        }
    }

    pub fn is_identified(&self) -> bool {
        self.identity.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.name.as_str())
    }

    pub fn key(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.key.as_str())
    }
}

/// Why admission or a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AddressBanned,
    IdentityBanned,
    NotAdmitted,
    AlreadyJoined,
}

impl RejectReason {
    /// Text of the `banned` notice for ban rejections.
    pub fn ban_notice(self) -> Option<&'static str> {
        match self {
            RejectReason::AddressBanned => Some("Your IP is banned."),
            RejectReason::IdentityBanned => Some("This username is banned."),
            RejectReason::NotAdmitted | RejectReason::AlreadyJoined => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection unless its address is banned.
    pub fn admit(
        &mut self,
        id: ConnectionId,
        address: IpAddr,
        moderation: &ModerationStore,
    ) -> Result<&Session, RejectReason> {
        if moderation.is_address_banned(&address) {
            return Err(RejectReason::AddressBanned);
        }
        let session = self
            .sessions
            .entry(id)
            .or_insert_with(|| Session::new(id, address));
        Ok(&*session)
    }

    /// Bind an admitted connection to a display identity and record its
    /// address against that identity.
    pub fn bind(
        &mut self,
        id: ConnectionId,
        name: &str,
        avatar: &str,
        moderation: &mut ModerationStore,
    ) -> Result<&Session, RejectReason> {
        let session = self.sessions.get_mut(&id).ok_or(RejectReason::NotAdmitted)?;
        if session.is_identified() {
            return Err(RejectReason::AlreadyJoined);
        }

        let name = match name.trim() {
            "" => PLACEHOLDER_NAME,
            trimmed => trimmed,
        };
        let key = identity_key(name);
        if moderation.is_identity_banned(&key) {
            return Err(RejectReason::IdentityBanned);
        }

        moderation.record_address(&key, session.address);
        session.identity = Some(Identity {
            name: name.to_string(),
            key,
            avatar: avatar.to_string(),
        });
        Ok(&*session)
    }

    /// Delete a session. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Ids of every session matching `predicate`, in admission order.
    pub fn find(&self, predicate: impl Fn(&Session) -> bool) -> Vec<ConnectionId> {
        self.sessions
            .values()
            .filter(|s| predicate(s))
            .map(|s| s.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
