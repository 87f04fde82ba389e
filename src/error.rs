//! Error taxonomy shared by every operation, and its HTTP rendering.
//!
//! Every variant maps to a stable machine-readable code plus a human message.
//! Infrastructure failures are logged here and answered with a generic message.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("an account with this email already exists")]
    DuplicateIdentity,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    TokenInvalid,

    #[error("user is deactivated")]
    UserDeactivated,

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("unsupported transform: {0}")]
    UnsupportedTransform(String),

    #[error("media store unavailable")]
    MediaStoreUnavailable(#[source] anyhow::Error),

    #[error("{0}")]
    ValidationError(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DuplicateIdentity => "duplicate_identity",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::TokenExpired => "token_expired",
            AppError::TokenInvalid => "token_invalid",
            AppError::UserDeactivated => "user_deactivated",
            AppError::NotFound => "not_found",
            AppError::Forbidden => "forbidden",
            AppError::UnsupportedTransform(_) => "unsupported_transform",
            AppError::MediaStoreUnavailable(_) => "media_store_unavailable",
            AppError::ValidationError(_) => "validation_error",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DuplicateIdentity => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::UserDeactivated => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::UnsupportedTransform(_) | AppError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::MediaStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures of the database or media store; the caller layer may retry these once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::MediaStoreUnavailable(_)
        )
    }
}

macro_rules! rejection_as_validation {
    ($($rejection:ty),+ $(,)?) => {$(
        impl From<$rejection> for AppError {
            fn from(rejection: $rejection) -> Self {
                AppError::ValidationError(rejection.body_text())
            }
        }
    )+};
}

rejection_as_validation!(JsonRejection, PathRejection, QueryRejection, MultipartRejection);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => error!(error = %e, "database failure"),
            AppError::Internal(e) => error!(error = ?e, "internal failure"),
            AppError::MediaStoreUnavailable(e) => error!(error = ?e, "media store failure"),
            _ => {}
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}
