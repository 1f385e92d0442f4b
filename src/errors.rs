use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::MissingFields;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("incorrect or no authorization token given for this resource")]
    Denied,

    #[error("{0}")]
    Validation(#[from] MissingFields),

    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("user with id '{0}' does not exist")]
    NoSuchUser(Uuid),

    #[error("{kind} with id '{id}' not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Denied => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) | AppError::DuplicateUsername(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NoSuchUser(_) | AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (error_type, code) = match &self {
            AppError::Denied => ("authentication_error", "unauthorized"),
            AppError::Validation(_) => ("invalid_request_error", "missing_fields"),
            AppError::DuplicateUsername(_) => ("invalid_request_error", "duplicate_username"),
            AppError::NoSuchUser(_) => ("not_found_error", "no_such_user"),
            AppError::NotFound { .. } => ("not_found_error", "not_found"),
            AppError::BadRequest(_) => ("invalid_request_error", "malformed_request"),
            AppError::Store(_) => ("internal_error", "internal_server_error"),
        };

        // Driver detail stays in the log.
        let msg = match &self {
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (self.status(), body).into_response()
    }
}
