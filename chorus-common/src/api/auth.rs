//! Identity primitives: internal API secret and session tokens
//!
//! # Internal secret
//!
//! Trusted in-cluster callers (schedulers, operators) present the internal
//! secret in the `x-internal-secret` header to trigger synthesis without a
//! user session. The secret lives in the `settings` table under
//! `internal_api_secret` and is generated on first start.
//!
//! # Session tokens
//!
//! End users present `Authorization: Bearer <token>`. Only the SHA-256 hex
//! digest of a token is ever stored.
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies here; the axum extractors live in
//! the service crate.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;
#[cfg(feature = "sqlx")]
use uuid::Uuid;

/// Settings key holding the internal API secret
pub const INTERNAL_SECRET_KEY: &str = "internal_api_secret";

/// Length of generated secrets and session tokens
const TOKEN_LENGTH: usize = 48;

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Database error loading or storing credentials
    DatabaseError(String),

    /// Stored credential is unusable
    InvalidSecret(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
            ApiAuthError::InvalidSecret(err) => write!(f, "Invalid secret: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Internal Secret Management
// ========================================

/// Load the internal secret from database settings
///
/// Generates and stores a new secret when none exists yet.
#[cfg(feature = "sqlx")]
pub async fn load_internal_secret(db: &SqlitePool) -> Result<String, ApiAuthError> {
    let result: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(INTERNAL_SECRET_KEY)
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((Some(value),)) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ApiAuthError::InvalidSecret(
            "internal_api_secret is empty".to_string(),
        )),
        None => initialize_internal_secret(db).await,
    }
}

/// Generate and store a fresh internal secret
///
/// Uses `INSERT OR IGNORE` then re-reads, so two processes starting at the
/// same time agree on one secret.
#[cfg(feature = "sqlx")]
pub async fn initialize_internal_secret(db: &SqlitePool) -> Result<String, ApiAuthError> {
    let secret = generate_token();

    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(INTERNAL_SECRET_KEY)
        .bind(&secret)
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let stored: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(INTERNAL_SECRET_KEY)
        .fetch_one(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(stored)
}

/// Compare a presented secret against the expected one in constant time
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    let a = presented.as_bytes();
    let b = expected.as_bytes();
    if a.len() != b.len() || b.is_empty() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ========================================
// Session Tokens
// ========================================

/// Generate a random alphanumeric token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 of a session token as 64 hex characters
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store a new session for `user_id` and return the plaintext token
#[cfg(feature = "sqlx")]
pub async fn create_session(
    db: &SqlitePool,
    user_id: Uuid,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<String, ApiAuthError> {
    let token = generate_token();

    sqlx::query(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(hash_session_token(&token))
    .bind(user_id.to_string())
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(expires_at.map(|t| t.to_rfc3339()))
    .execute(db)
    .await
    .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(token)
}

/// Resolve a presented token to its user, ignoring expired sessions
#[cfg(feature = "sqlx")]
pub async fn lookup_session(db: &SqlitePool, token: &str) -> Result<Option<Uuid>, ApiAuthError> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT user_id, expires_at FROM sessions WHERE token_hash = ?")
            .bind(hash_session_token(token))
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let Some((user_id, expires_at)) = row else {
        return Ok(None);
    };

    if let Some(expires_at) = expires_at {
        let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| ApiAuthError::InvalidSecret(format!("Bad expires_at: {}", e)))?;
        if expires_at <= chrono::Utc::now() {
            return Ok(None);
        }
    }

    Uuid::parse_str(&user_id)
        .map(Some)
        .map_err(|e| ApiAuthError::InvalidSecret(format!("Bad user id in session: {}", e)))
}

// ========================================
// Tests
// ========================================
