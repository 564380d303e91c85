//! HTTP rendering of chat errors.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::chat::core::errors::ChatError;

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let message = match &self {
            // Storage internals stay in the logs.
            err if err.is_persistence() => "failed to save conversation".to_string(),
            err => err.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
