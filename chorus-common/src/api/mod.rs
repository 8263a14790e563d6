//! Shared HTTP API primitives
//!
//! Contains only pure functions, database operations (via sqlx) and shared
//! types. The service crate wraps these with axum extractors.

pub mod auth;
pub mod types;

pub use auth::{generate_token, hash_session_token, secrets_match, ApiAuthError};
#[cfg(feature = "sqlx")]
pub use auth::{create_session, initialize_internal_secret, load_internal_secret, lookup_session};
pub use types::ErrorResponse;

/// Header carrying the internal API secret
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";
