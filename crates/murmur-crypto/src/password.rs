//! Group password verification
//!
//! Passwords are stored as a salted SHA-256 digest and checked in constant
//! time. The plaintext is never kept.

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_SIZE: usize = 16;

/// Salted digest of a group password
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash {
    salt: [u8; SALT_SIZE],
    digest: [u8; 32],
}

impl PasswordHash {
    /// Hash a password with a fresh random salt
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(password, salt)
    }

    fn with_salt(password: &str, salt: [u8; SALT_SIZE]) -> Self {
        PasswordHash {
            salt,
            digest: digest(&salt, password),
        }
    }

    /// Check a candidate password
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate = digest(&self.salt, candidate);
        let diff = self
            .digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

fn digest(salt: &[u8; SALT_SIZE], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"murmur-group-password");
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}
