//! Request identity
//!
//! A request may present a user session (`Authorization: Bearer <token>`)
//! and/or the internal secret (`x-internal-secret`). Neither is required
//! to extract an [`Identity`]; handlers decide what they need.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chorus_common::api::{lookup_session, secrets_match, INTERNAL_SECRET_HEADER};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::synthesis::SynthesisCaller;
use crate::AppState;

/// Who is calling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    /// Session user, if a valid unexpired token was presented
    pub user_id: Option<Uuid>,
    /// Internal secret presented and correct
    pub internal: bool,
}

impl Identity {
    /// Caller for the manual synthesis trigger; the internal secret wins
    pub fn synthesis_caller(&self) -> Option<SynthesisCaller> {
        if self.internal {
            Some(SynthesisCaller::Internal)
        } else {
            self.user_id.map(SynthesisCaller::User)
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let internal = parts
            .headers
            .get(INTERNAL_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|presented| secrets_match(presented, &state.internal_secret))
            .unwrap_or(false);

        let user_id = match bearer_token(parts) {
            Some(token) => lookup_session(&state.db, token).await.map_err(|e| {
                warn!("Session lookup failed: {}", e);
                ApiError::StorageFailure(e.to_string())
            })?,
            None => None,
        };

        Ok(Identity { user_id, internal })
    }
}
