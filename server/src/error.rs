use http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde_json::json;
use tracing::error;

use crate::auth::jwt::AuthError;
use crate::auth::oauth::TokenError;

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, derive_more::Display)]
pub enum AppError {
    #[display("Bad request: {_0}")]
    BadRequest(String),
    #[display("Conflict: {_0}")]
    Conflict(String),
    #[display("Not found")]
    NotFound,
    #[display("Unauthorized")]
    Unauthorized,
    #[display("Token error: {_0}")]
    Oauth2(TokenError),
    #[display("Database error: {_0}")]
    DbError(DbErr),
    #[display("Request error: {_0}")]
    Request(reqwest::Error),
    #[display("Internal error: {_0}")]
    Internal(anyhow::Error),
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::DbError(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Request(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Oauth2(err)
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::Unauthorized
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Oauth2(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
            AppError::DbError(err) => {
                error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Request(err) => {
                error!("upstream request error: {err}");
                (StatusCode::BAD_GATEWAY, "Upstream request failed".to_string())
            }
            AppError::Internal(err) => {
                error!("internal error: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// True when the error is a Postgres unique constraint violation. The ingest
/// stage uses this to turn a lost insert race into a duplicate outcome.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_)))
}
