//! The public HTTP surface never echoes internal errors (spec §7):
//! every failure response is a `{status, code, detail}` triple.

use axum::{http::StatusCode, response::IntoResponse, response::Json, response::Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    code: &'static str,
    detail: String,
}

/// Newtype wrapping the handful of failure shapes the control API can
/// produce, modeled on the teacher's `api/routes.rs` pattern of mapping
/// internal failures to a `StatusCode` rather than surfacing them raw.
pub enum ApiError {
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    BadRequest(&'static str, String),
    Internal(&'static str, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            ApiError::NotFound(code, detail) => (StatusCode::NOT_FOUND, code, detail),
            ApiError::Conflict(code, detail) => (StatusCode::CONFLICT, code, detail),
            ApiError::BadRequest(code, detail) => (StatusCode::BAD_REQUEST, code, detail),
            ApiError::Internal(code, detail) => (StatusCode::INTERNAL_SERVER_ERROR, code, detail),
        };
        let body = ErrorBody {
            status: status.as_u16(),
            code,
            detail,
        };
        (status, Json(body)).into_response()
    }
}
