use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{Device, SessionStatus};

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Invalid token")]
    InvalidToken,
    #[error("Unauthorized")]
    Unauthorized,

    // Device errors
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Unknown device detected")]
    UnknownDeviceDetected,
    #[error("Malformed device id: {0}")]
    MalformedDeviceId(String),

    // Fingerprint errors
    #[error("Fingerprint not found")]
    FingerprintNotFound,
    #[error("Fingerprint already registered to device {}", .existing.uuid)]
    FingerprintDuplicated { existing: Box<Device> },

    // Session errors
    #[error("Session not found")]
    SessionNotFound,
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    // Validation errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    // Storage errors
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Cache errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::MalformedDeviceId(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            // 401 Unauthorized
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),

            // 404 Not Found
            AppError::DeviceNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::UnknownDeviceDetected => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::FingerprintNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::SessionNotFound => (StatusCode::NOT_FOUND, self.to_string()),

            // 409 Conflict
            AppError::FingerprintDuplicated { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::UniqueViolation { .. } => (StatusCode::CONFLICT, self.to_string()),

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        // The conflicting device travels with the duplicate error so clients
        // can merge or redirect instead of retrying blindly.
        let body = match &self {
            AppError::FingerprintDuplicated { existing } => Json(json!({
                "error": message,
                "device": existing.uuid,
            })),
            _ => Json(json!({
                "error": message
            })),
        };

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
