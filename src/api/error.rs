//! API error taxonomy and its HTTP representation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("parameter validation failed")]
    ValidationFailed {
        errors: Vec<ValidationError>,
        parameters_schema: Value,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("demand mismatch: {0}")]
    DemandMismatch(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    pub schema_path: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::DemandMismatch(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ValidationFailed { .. } => "parameter_validation_failed",
            ApiError::Conflict(_) => "conflict",
            ApiError::DemandMismatch(_) => "demand_mismatch",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Categorizes an opaque store/internal error by message pattern, for call sites
    /// that only have an `anyhow::Error` to work with.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("not found") {
            ApiError::NotFound(message)
        } else if lowered.contains("conflict") || lowered.contains("already exists") {
            ApiError::Conflict(message)
        } else {
            ApiError::Internal(err)
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => ApiError::Unauthorized("missing bearer token".into()),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ApiError::Internal(err) => {
                tracing::error!(error = %err, code, "internal error");
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::warn!(msg, code, "service unavailable");
            }
            ApiError::Conflict(msg) | ApiError::DemandMismatch(msg) => {
                tracing::debug!(msg, code, "request conflict");
            }
            _ => {
                tracing::debug!(code, "request rejected");
            }
        }

        let body = match &self {
            ApiError::ValidationFailed {
                errors,
                parameters_schema,
            } => json!({
                "error": code,
                "code": code,
                "validation_errors": errors,
                "parameters_schema": parameters_schema,
            }),
            other => json!({
                "error": code,
                "code": code,
                "details": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_not_found_messages() {
        let err = ApiError::from_anyhow(anyhow::anyhow!("session not found: ses_x"));
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::DemandMismatch("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
