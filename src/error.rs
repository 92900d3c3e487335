use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures raised by an inference backend. The generation core passes these
/// through untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid length bounds: min_len ({min_len}) must be <= max_len ({max_len})")]
    InvalidConfig { min_len: usize, max_len: usize },
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("generation task failed: {0}")]
    Task(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::InvalidConfig { .. } | ServiceError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Engine(_) | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
