use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sandbox_lifecycle::LifecycleError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            LifecycleError::InvalidState { .. } | LifecycleError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            LifecycleError::Permission { .. } => ApiError::Forbidden(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
