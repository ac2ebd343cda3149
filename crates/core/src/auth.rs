// SPDX-License-Identifier: MIT

//! Reservation auth tokens.
//!
//! A token is a 160-bit value, rendered as 40 lowercase hex characters —
//! the same shape `dispycosnode.py` produces with `sha1(os.urandom(20))`.
//! We derive it the same way modulo the hash: random bytes through SHA-256,
//! truncated to 20 bytes, since `sha2` is already on the dependency graph
//! and a 160-bit token doesn't need a dedicated hash crate.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

const TOKEN_BYTES: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AuthToken([u8; TOKEN_BYTES]);

impl AuthToken {
    /// Generate a fresh random token for a new reservation.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let digest = Sha256::digest(seed);
        let mut bytes = [0u8; TOKEN_BYTES];
        bytes.copy_from_slice(&digest[..TOKEN_BYTES]);
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != TOKEN_BYTES * 2 {
            return None;
        }
        let mut bytes = [0u8; TOKEN_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({})", self)
    }
}
