//! API middleware: admin authentication.

pub mod auth;

pub use auth::require_admin;
