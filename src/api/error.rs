//! JSON error responses for the local API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ServiceErrorKind;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retryable: Option<bool>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retryable: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// A failed summarization call; retryable failures map to 503.
    pub fn service(message: impl Into<String>, kind: ServiceErrorKind) -> Self {
        let status = match kind {
            ServiceErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceErrorKind::NonRetryable => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: message.into(),
            retryable: Some(kind == ServiceErrorKind::Retryable),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": true,
            "message": self.message,
        });
        if let Some(retryable) = self.retryable {
            body["retryable"] = json!(retryable);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
