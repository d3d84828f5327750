//! Connector secrets and pair-token generation.
//!
//! Pair tokens and connector secrets are both random 32-byte values, hex
//! encoded for transport and stored only as a salted SHA-256 digest (spec
//! §3 Connector/PairToken, §4.3 pair-token consumption).

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("invalid hex secret digest")]
    InvalidEncoding,
}

/// Generates a fresh random secret, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Hashes a secret with a random salt, returning `"<salt_hex>:<digest_hex>"`.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex_encode(&salt);
    let digest = digest_with_salt(&salt_hex, secret);
    format!("{salt_hex}:{digest}")
}

/// Verifies `secret` against a `"<salt_hex>:<digest_hex>"` record produced
/// by [`hash_secret`], in constant time.
pub fn verify_secret(secret: &str, stored: &str) -> Result<bool, SecretError> {
    let (salt_hex, digest_hex) = stored.split_once(':').ok_or(SecretError::InvalidEncoding)?;
    let expected = digest_with_salt(salt_hex, secret);
    Ok(constant_time_eq(expected.as_bytes(), digest_hex.as_bytes()))
}

fn digest_with_salt(salt_hex: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(secret.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time byte comparison, used for the access-token gate (spec
/// §4.2) and for secret verification so timing does not leak a prefix
/// match.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_unique() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let secret = generate_secret();
        let stored = hash_secret(&secret);
        assert!(verify_secret(&secret, &stored).unwrap());
        assert!(!verify_secret("wrong-secret", &stored).unwrap());
    }

    #[test]
    fn verify_rejects_malformed_record() {
        assert!(verify_secret("anything", "no-colon-here").is_err());
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
