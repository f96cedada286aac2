// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Why a credential was refused. Always fatal to the connection attempt.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token supplied")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token carries no subject")]
    MissingSubject,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to hand a frame to one recipient. Never aborts a fan-out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound buffer is full")]
    Full,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidVar { name: &'static str, value: String },
}

// HTTP-layer errors, returned straight from axum handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication rejected: {0}")]
    Auth(#[from] AuthError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(e) => {
                tracing::warn!("🚫 [AUTH] Handshake rejected: {}", e);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_unauthorized() {
        let resp = AppError::from(AuthError::MissingToken).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn expired_tokens_are_unauthorized_too() {
        let resp = AppError::from(AuthError::Expired).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
