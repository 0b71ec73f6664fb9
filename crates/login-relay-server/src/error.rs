use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use login_relay_core::RelayError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP callers as `{"status":"error","message":...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required parameters (login, password, device_id, order_id).")]
    MissingParameters,

    #[error("Malformed request body.")]
    MalformedBody,

    #[error("Unsupported content type; send application/x-www-form-urlencoded or multipart/form-data.")]
    UnsupportedContentType,

    #[error("Invalid {field}: expected {expected}.")]
    InvalidParameter {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Authentication backend unavailable.")]
    BackendUnavailable(#[source] RelayError),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameters | Self::MalformedBody | Self::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
