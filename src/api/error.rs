use std::collections::BTreeMap;
use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::engine::{BookingError, ErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error("one or more fields are invalid")]
    Validation(#[from] validator::ValidationErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid bearer token")]
    Unauthenticated,
    #[error("tenant unavailable: {0}")]
    Tenant(io::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn booking_status(e: &BookingError) -> StatusCode {
        if e.is_not_found() {
            return StatusCode::NOT_FOUND;
        }
        match e.kind() {
            ErrorKind::Validation | ErrorKind::Reference => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Infrastructure if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Booking(e) => Self::booking_status(e),
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Tenant(e) if e.kind() == io::ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ApiError::Tenant(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Booking(e) => e.code(),
            ApiError::Validation(_) | ApiError::BadRequest(_) => "INVALID_INPUT",
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Tenant(e) if e.kind() == io::ErrorKind::InvalidInput => "INVALID_TENANT",
            ApiError::Tenant(_) => "TENANT_UNAVAILABLE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            ApiError::Validation(errors) => {
                let mut details: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages = field_errors
                        .iter()
                        .map(|e| match &e.message {
                            Some(m) => m.to_string(),
                            None => e.code.to_string(),
                        })
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                json!({ "error": { "code": code, "message": self.to_string(), "details": details } })
            }
            _ if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!("internal error: {self}");
                json!({ "error": { "code": code, "message": "an unexpected error occurred" } })
            }
            _ => json!({ "error": { "code": code, "message": self.to_string() } }),
        };
        (status, Json(body)).into_response()
    }
}
