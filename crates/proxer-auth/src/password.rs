//! Argon2id hashing for the super-admin account (spec §6 HTTP Basic auth).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    HashingFailed(String),
    #[error("failed to verify password: {0}")]
    VerificationFailed(String),
    #[error("invalid password hash format: {0}")]
    InvalidHashFormat(String),
}

/// Hashes `password` into a PHC-formatted Argon2id string suitable for
/// storing as `AppState.super_admin_password_hash`.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verifies a presented password against a stored PHC hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))?;
    let argon2 = Argon2::default();
    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_password_round_trips() {
        let hash = hash_password("super-secret-admin-pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("super-secret-admin-pw", &hash).unwrap());
        assert!(!verify_password("wrong-pw", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently_each_time() {
        let a = hash_password("team-a-admin").unwrap();
        let b = hash_password("team-a-admin").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("team-a-admin", &a).unwrap());
        assert!(verify_password("team-a-admin", &b).unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_rejected() {
        let result = verify_password("anything", "not-a-phc-hash");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat(_))));
    }
}
