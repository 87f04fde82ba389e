use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::TokenService;
use super::repo::UserRepo;
use crate::error::{AppError, AppResult};

/// Resolves a bearer header to an active user.
///
/// Tokens are stateless, so the user is re-read on every request: a token
/// that outlives its account's deactivation is refused here.
#[derive(Clone)]
pub struct SessionGuard {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserRepo>,
}

impl SessionGuard {
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserRepo>) -> Self {
        Self { tokens, users }
    }

    pub async fn authenticate(&self, raw_header: Option<&str>) -> AppResult<Uuid> {
        let header = raw_header.ok_or(AppError::TokenInvalid)?;
        let token = bearer_token(header).ok_or(AppError::TokenInvalid)?;
        let user_id = self.tokens.validate(token)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::TokenInvalid)?;
        if !user.is_active {
            warn!(user_id = %user_id, "token presented for deactivated user");
            return Err(AppError::UserDeactivated);
        }
        Ok(user_id)
    }
}

/// Accepts `Bearer <token>` with a case-insensitive scheme.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticated caller's user ID.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionGuard: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let guard = SessionGuard::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        guard.authenticate(header).await.map(AuthUser)
    }
}
