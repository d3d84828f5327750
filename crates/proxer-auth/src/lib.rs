//! Password and secret handling for the gateway's bootstrap auth surface:
//! the super-admin account and connector pairing secrets.

pub mod password;
pub mod secret;

pub use password::{hash_password, verify_password, PasswordError};
pub use secret::{constant_time_eq, generate_secret, hash_secret, verify_secret, SecretError};
