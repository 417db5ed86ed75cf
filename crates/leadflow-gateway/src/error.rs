//! Gateway error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leadflow_engine::EngineError;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by gateway handlers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Authentication or token validation failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Webhook signature missing or wrong.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The tenant in the path is not configured.
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// The request body could not be used.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Engine-side failure.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// IO failure binding or serving.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Auth(_) | GatewayError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            GatewayError::UnknownTenant(_) => (StatusCode::NOT_FOUND, self.to_string()),
            GatewayError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GatewayError::Engine(EngineError::UnknownTenant(t)) => {
                (StatusCode::NOT_FOUND, format!("Unknown tenant: {t}"))
            }
            GatewayError::Engine(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
            GatewayError::Io(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
