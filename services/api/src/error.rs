use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tally_common::error::TallyError;

/// `TallyError` rendered as `{ "error": msg }` with a matching status.
pub struct ApiError(pub TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TallyError::NotFound(_) => StatusCode::NOT_FOUND,
            TallyError::Validation(_) => StatusCode::BAD_REQUEST,
            TallyError::Conflict(_) => StatusCode::CONFLICT,
            TallyError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            TallyError::Config(_) | TallyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0 {
            TallyError::NotFound(msg) | TallyError::Validation(msg) | TallyError::Conflict(msg) => {
                msg
            }
            // Server-side details stay in the log.
            other => {
                tracing::error!(error = %other, status = status.as_u16(), "request failed");
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_lowercase()
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
