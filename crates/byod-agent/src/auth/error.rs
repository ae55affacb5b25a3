//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing authorization header.
    #[error("missing authorization header")]
    MissingAuthHeader,

    /// Invalid authorization header format.
    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("unsupported auth scheme: {0}")]
    UnsupportedScheme(String),

    /// The accounts service rejected the credentials.
    #[error("authentication failed for user: {0}")]
    InvalidCredentials(String),

    /// The account belongs to another organization than the host owner.
    #[error("account organization {found} does not match host organization {expected}")]
    OrganizationMismatch { expected: i64, found: i64 },

    /// The accounts service could not be reached or answered garbage.
    #[error("accounts service error: {0}")]
    Remote(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub status: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        log::info!("Rejecting request: {}", self);
        let body = Json(AuthErrorResponse {
            status: "Unauthorized",
        });
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}
