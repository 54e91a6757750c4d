use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Failures of the run-length mask codec.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A count was cut short by the end of input, or a flag appeared where a
    /// digit was expected.
    #[error("malformed compressed row at byte {offset}: {reason}")]
    MalformedInput { offset: usize, reason: &'static str },
    /// The decoded element count disagrees with the declared shape.
    #[error("decoded {actual} elements, shape requires {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for AppError {
    fn from(e: CodecError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (code, Json(json!({ "code": 1, "msg": msg }))).into_response()
    }
}
