//! Status taxonomy surfaced to callers.
//!
//! Recoverable conditions are typed results up to the workflow boundary;
//! unexpected errors ride the `Internal` variant and are reported without
//! leaking internals.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::catalog;

#[derive(Debug, Error)]
pub enum Fault {
    #[error("unprocessable input")]
    Unprocessable(Vec<FieldError>),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    RateLimited(&'static str),
    #[error("{0}")]
    Unavailable(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Per-field validation failure, surfaced as `{"field": "message"}` pairs.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

impl Fault {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Fault::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Fault::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Fault::Forbidden(_) => StatusCode::FORBIDDEN,
            Fault::NotFound(_) => StatusCode::NOT_FOUND,
            Fault::Conflict(_) => StatusCode::CONFLICT,
            Fault::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Fault::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Fault::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients. Internal errors are sanitized.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Fault::Unprocessable(_) => "Validation error, unprocessable entity.".to_string(),
            Fault::Internal(_) => catalog::INTERNAL.to_string(),
            other => other.to_string(),
        }
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: u16,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    #[must_use]
    pub fn ok(status: StatusCode, data: T) -> Self {
        Self {
            status: status.as_u16(),
            data: Some(data),
            message: None,
        }
    }

}

impl Envelope<serde_json::Value> {
    /// Envelope with no payload, e.g. a 201 with nothing to return.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            data: None,
            message: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    data: Option<serde_json::Value>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    validations: Option<Vec<FieldError>>,
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        if let Fault::Internal(err) = &self {
            error!("internal error: {err:#}");
        }

        let status = self.status_code();
        let validations = match &self {
            Fault::Unprocessable(fields) => Some(fields.clone()),
            _ => None,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            data: None,
            message: self.client_message(),
            validations,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn faults_map_to_expected_status_codes() {
        assert_eq!(
            Fault::Unauthorized(catalog::BAD_CREDENTIALS).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Fault::Forbidden(catalog::TAMPERED_RECORD).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Fault::RateLimited(catalog::TOO_MANY_REQUESTS).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Fault::Internal(anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let fault = Fault::Internal(anyhow!("connection refused to 10.0.0.5"));
        assert_eq!(fault.client_message(), catalog::INTERNAL);
    }

    #[test]
    fn validation_faults_carry_field_errors() {
        let fault = Fault::Unprocessable(vec![FieldError::new("email", "Invalid email address.")]);
        assert_eq!(fault.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
