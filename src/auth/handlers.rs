use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            CredentialsRequest, EmailRequest, PublicUser, ResetPasswordRequest, TokenResponse,
            UpdateMeRequest, VerifyRequest,
        },
        extractors::AuthUser,
    },
    error::AppResult,
    extract::ApiJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/request-verify-token", post(request_verify_token))
        .route("/auth/verify", post(verify))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me).patch(update_me).delete(deactivate_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CredentialsRequest>,
) -> AppResult<(StatusCode, Json<PublicUser>)> {
    let user = state
        .credentials
        .register(&payload.email, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CredentialsRequest>,
) -> AppResult<Json<TokenResponse>> {
    let user_id = state
        .credentials
        .verify_credentials(&payload.email, &payload.password)
        .await?;
    let access_token = state.tokens.issue(user_id)?;

    info!(user_id = %user_id, "user logged in");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
        expires_in: state.tokens.access_ttl().as_secs(),
    }))
}

/// Tokens are stateless; the client discards its copy and the token stays
/// valid until it expires.
#[instrument]
pub async fn logout(AuthUser(user_id): AuthUser) -> StatusCode {
    info!(user_id = %user_id, "user logged out");
    StatusCode::NO_CONTENT
}

#[instrument(skip(state, payload))]
pub async fn request_verify_token(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<EmailRequest>,
) -> AppResult<StatusCode> {
    state.accounts.request_verification(&payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VerifyRequest>,
) -> AppResult<Json<PublicUser>> {
    let user = state.accounts.verify(&payload.token).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<EmailRequest>,
) -> AppResult<StatusCode> {
    state.accounts.forgot_password(&payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    state
        .accounts
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<PublicUser>> {
    let user = state.credentials.get(user_id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<UpdateMeRequest>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .credentials
        .update_profile(user_id, payload.email.as_deref(), payload.password.as_deref())
        .await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn deactivate_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    state.credentials.deactivate(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod me_tests {
    use super::*;

    #[test]
    fn public_user_hides_secret_material() {
        let response = PublicUser {
            id: uuid::Uuid::new_v4(),
            email: "test@example.com".to_string(),
            is_active: true,
            is_verified: false,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("1970-01-01T00:00:00Z"));
        assert!(!json.contains("password"));
    }
}
