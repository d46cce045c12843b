use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scrum_core::command::UnknownMethod;
use scrum_core::{Envelope, ErrorCode, ParseError, ScrumError};
use serde_json::json;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Every handler failure. Renders the same envelope the RPC transport uses,
/// with the HTTP status derived from the error code.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self(ScrumError::invalid(field, reason).into())
    }

    pub fn from_parse(err: ParseError) -> Self {
        match err {
            ParseError::UnknownMethod(u) => Self(u.into()),
            ParseError::Params(e) => Self(e.into()),
        }
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound | ErrorCode::MethodNotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Storage | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope response for a failure raised outside the service layer.
pub fn envelope_error(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Response {
    (status_for(code), Json(Envelope::error(code, message, details))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(e) = self.0.downcast_ref::<ScrumError>() {
            let status = status_for(e.code());
            if status.is_server_error() {
                tracing::error!(error = %e, "request failed");
            }
            return (status, Json(Envelope::failure(e))).into_response();
        }
        if let Some(UnknownMethod(method)) = self.0.downcast_ref::<UnknownMethod>() {
            return envelope_error(
                ErrorCode::MethodNotFound,
                format!("unknown method: {method}"),
                json!({ "reason": "unknown_method", "method": method }),
            );
        }

        tracing::error!(error = %self.0, "unhandled error");
        envelope_error(
            ErrorCode::Internal,
            self.0.to_string(),
            json!({ "reason": "internal" }),
        )
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
