//! Webhook error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

/// Error type for webhook operations
///
/// Anything that is not a business decision ends up here. Denials are
/// regular admission responses, not errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review or the object inside it could not be decoded
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// The request was well formed but cannot be evaluated
    #[error("{0}")]
    BadRequest(String),

    /// A store or internal failure
    #[error("internal error: {0}")]
    Internal(#[from] platform_common::Error),

    /// The ingress annotator failed
    #[error("ingress annotation failed: {0}")]
    Ingress(#[from] platform_ingress::IngressError),

    /// A response patch could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WebhookError {
    /// HTTP status returned to the API server
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::InvalidReview(_) | WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) | WebhookError::Ingress(_) | WebhookError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::BAD_REQUEST {
            self.to_string()
        } else {
            // Internal details stay in the log
            error!(error = %self, "webhook request failed");
            "internal error".to_string()
        };

        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}
