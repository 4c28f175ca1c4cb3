use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

// Gateway error types
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // No upstream API keys configured, fatal at startup
    #[error("no Gemini API keys configured (set GEMINI_API_KEY or GEMINI_API_KEY_1..5)")]
    NoCredentials,

    // Upstream answered with a non-success status
    #[error("Gemini request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },

    // Upstream answered 200 but without any text
    #[error("no content in Gemini response")]
    EmptyCompletion,

    // Request body did not pass validation
    #[error("{0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream { .. }
            | GatewayError::EmptyCompletion
            | GatewayError::Http(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoCredentials | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
