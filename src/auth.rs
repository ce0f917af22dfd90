//! Bearer-token identification.
//!
//! Tokens are minted by the CLI (`token issue`) and by `seed`; only their
//! SHA-256 digest is stored. There is no login or registration endpoint.

use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::{ApiError, SharedState};
use crate::db::{self, EcoDb};
use crate::models::User;

const TOKEN_PREFIX: &str = "eco_";

/// A fresh opaque token: prefix plus 256 bits of v4 UUID randomness.
pub fn generate_token() -> String {
    format!(
        "{}{}{}",
        TOKEN_PREFIX,
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Mint a token for `user_id`, store its digest and return the plaintext.
/// The plaintext is never persisted.
pub fn issue_token(db: &EcoDb, user_id: i64) -> Result<String> {
    let token = generate_token();
    db.create_api_token(user_id, &hash_token(&token))?;
    Ok(token)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let token = value.strip_prefix("Bearer ").unwrap_or("").trim();
    if token.is_empty() {
        return Err(ApiError::Unauthorized(
            "Authentication credentials were not provided.".into(),
        ));
    }
    Ok(token.to_string())
}

/// Resolve a plaintext token to its active user and record today's visit
/// in the login streak.
pub async fn authenticate(state: &SharedState, token: &str) -> Result<User, ApiError> {
    if token.is_empty() {
        return Err(ApiError::Unauthorized(
            "Authentication credentials were not provided.".into(),
        ));
    }
    let token_hash = hash_token(token);
    let user = state
        .db
        .call(move |db| match db.user_for_token_hash(&token_hash)? {
            Some(user) => db.update_login_streak(user.id, db::today()).map(Some),
            None => Ok(None),
        })
        .await?;
    user.ok_or_else(|| ApiError::Unauthorized("Invalid token.".into()))
}

/// The authenticated caller, extracted from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub User);

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user = authenticate(state, &token).await?;
        Ok(CurrentUser(user))
    }
}
