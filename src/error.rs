use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Authentication failed")]
    Unauthenticated,
    #[error("Not a participant of this conversation")]
    NotParticipant,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Not found")]
    NotFound,
    #[error("Connection admission timed out")]
    AdmissionTimeout,
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::Unauthenticated => {
                tracing::debug!("Authentication failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Self::NotParticipant => {
                tracing::debug!("Caller is not a conversation participant");
                (StatusCode::FORBIDDEN, "Not a participant of this conversation".to_string())
            }
            Self::PermissionDenied => {
                tracing::debug!("Permission denied");
                (StatusCode::FORBIDDEN, "Permission denied".to_string())
            }
            Self::ValidationFailed(msg) => {
                tracing::debug!(message = %msg, "Validation failed");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::MalformedPayload(msg) => {
                tracing::debug!(message = %msg, "Malformed payload");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::AdmissionTimeout => {
                tracing::warn!("Connection admission timed out");
                (StatusCode::REQUEST_TIMEOUT, "Connection admission timed out".to_string())
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
