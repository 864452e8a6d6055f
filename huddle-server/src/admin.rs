//! Administrator verification.
//!
//! A session becomes administrator only by presenting the shared credential.
//! The flag lives on the session for the rest of the connection and is never
//! derived from the display name.

use sha2::{Digest, Sha256};

use crate::registry::Session;

#[derive(Debug, Clone)]
pub struct AdminAuthority {
    /// SHA-256 of the configured credential. `None` disables verification.
    credential_digest: Option<[u8; 32]>,
}

impl AdminAuthority {
    pub fn new(credential: Option<&str>) -> Self {
        Self {
            credential_digest: credential.map(digest),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.credential_digest.is_some()
    }

    pub fn is_admin(&self, session: &Session) -> bool {
        session.is_admin
    }

    /// Check `credential` and, on a match, mark the session as administrator.
    /// A failed attempt leaves the flag untouched.
    pub fn verify(&self, session: &mut Session, credential: &str) -> bool {
        let Some(expected) = self.credential_digest else {
            return false;
        };
        // Compare fixed-length digests without an early exit.
        let granted = digest(credential)
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
        if granted {
            session.is_admin = true;
        }
        granted
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}
