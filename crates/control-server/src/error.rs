//! Maps [`CommandError`] onto the status codes spec.md §7 assigns each
//! branch of the error taxonomy. This is the only place in the server that
//! knows about HTTP status codes for domain errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use command_core::CommandError;
use serde_json::json;

pub struct ApiError(CommandError);

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CommandError::Validation(err) => (StatusCode::BAD_REQUEST, err.message().to_string()),
            CommandError::NotFound => (StatusCode::NOT_FOUND, "command not found".to_string()),
            CommandError::LeaseConflict => {
                (StatusCode::CONFLICT, "Lease is not current".to_string())
            }
            CommandError::Store(err) => {
                tracing::error!(error = %err, "command store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
