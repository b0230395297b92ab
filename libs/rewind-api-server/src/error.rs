use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use rewind_api::LogError;

/// Failure of a REST handler. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("network event not found: {0}")]
    EventNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("event log: {0}")]
    Log(#[from] LogError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::RecordNotFound(_) | ApiError::EventNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Log(LogError::RecordNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_records_map_to_404() {
        let err = ApiError::from(LogError::RecordNotFound("r9".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
