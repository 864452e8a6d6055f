//! Username and address bans.
//!
//! Bans live for the lifetime of the process. An identity ban pairs with an
//! address ban through the identity → last-address mapping as it stands at
//! the moment of the ban or unban; later address changes are not re-applied.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;

use crate::protocol::BanEntry;

/// Lower-cased display name used for every ban and lookup comparison.
pub fn identity_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Default)]
pub struct ModerationStore {
    banned_identities: BTreeSet<String>,
    banned_addresses: HashSet<IpAddr>,
    last_address: HashMap<String, IpAddr>,
}

impl ModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_address_banned(&self, addr: &IpAddr) -> bool {
        self.banned_addresses.contains(addr)
    }

    pub fn is_identity_banned(&self, key: &str) -> bool {
        self.banned_identities.contains(key)
    }

    /// Ban an identity key, and its last known address if there is one.
    /// Returns the address that was banned alongside it.
    pub fn ban_identity(&mut self, key: &str) -> Option<IpAddr> {
        self.banned_identities.insert(key.to_string());
        let addr = self.last_address.get(key).copied()?;
        self.banned_addresses.insert(addr);
        Some(addr)
    }

    /// Lift an identity ban, and the ban on its last known address.
    /// Returns the address that was unbanned alongside it.
    pub fn unban_identity(&mut self, key: &str) -> Option<IpAddr> {
        self.banned_identities.remove(key);
        let addr = self.last_address.get(key).copied()?;
        self.banned_addresses.remove(&addr);
        Some(addr)
    }

    /// Remember where an identity was last seen. Called on every successful join.
    pub fn record_address(&mut self, key: &str, addr: IpAddr) {
        self.last_address.insert(key.to_string(), addr);
    }

    pub fn list_bans(&self) -> Vec<BanEntry> {
        self.banned_identities
            .iter()
            .map(|key| BanEntry {
                name: key.clone(),
                address: self.last_address.get(key).copied(),
            })
            .collect()
    }

    pub fn banned_identity_count(&self) -> usize {
        self.banned_identities.len()
    }
}
