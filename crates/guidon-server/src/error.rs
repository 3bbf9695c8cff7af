use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use guidon_store::StoreError;

use crate::canvas::CanvasError;
use crate::snapshot::RenderError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record".to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<CanvasError> for ServerError {
    fn from(e: CanvasError) -> Self {
        match e {
            CanvasError::OutOfBounds { .. } | CanvasError::InvalidColor(_) => {
                ServerError::BadRequest(e.to_string())
            }
            CanvasError::Store(inner) => inner.into(),
            CanvasError::Render(inner) => inner.into(),
        }
    }
}

impl From<RenderError> for ServerError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::NotFound(id) => ServerError::NotFound(format!("snapshot {id}")),
            RenderError::InvalidId(id) => ServerError::BadRequest(format!("invalid snapshot id {id}")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
