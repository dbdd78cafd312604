//! Password hashing is named an out-of-scope "authentication primitive" by
//! spec §1 — "specified only by the interfaces the core consumes". This
//! trait is that interface; `update`'s password-shadow-field handling (spec
//! §4.B) is the thing in scope, not the hash algorithm itself.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> String;
}

/// A stand-in implementation satisfying the trait boundary above: salted
/// SHA-256. Not production-grade password hashing (no real deployment
/// should use this over argon2/bcrypt) — good enough to exercise the
/// create/update shadow-field contract this crate is actually responsible for.
pub struct Sha256PasswordHasher;

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, plaintext: &str) -> String {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(&salt);
        hasher.update(plaintext.as_bytes());
        let digest = hasher.finalize();
        format!("{}${}", hex::encode(salt), hex::encode(digest))
    }
}

pub fn verify(hash: &str, plaintext: &str) -> bool {
    let mut parts = hash.splitn(2, '$');
    let (salt_hex, digest_hex) = match (parts.next(), parts.next()) {
        (Some(s), Some(d)) => (s, d),
        _ => return false,
    };
    let salt = match hex::decode(salt_hex) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize()) == digest_hex
}
