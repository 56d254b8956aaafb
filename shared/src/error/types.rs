//! Error types and API response envelope

use super::codes::ErrorCode;
use http::StatusCode;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// One field-level problem inside an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Dotted path of the offending field (`lines.0.qty`)
    pub path: String,
    pub problem: String,
}

/// Application error with structured error code and details
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Field-level problems, empty unless the error carries some
    pub details: Vec<ErrorDetail>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: Vec::new(),
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Add a field-level problem to this error
    pub fn with_detail(mut self, path: impl Into<String>, problem: impl Into<String>) -> Self {
        self.details.push(ErrorDetail {
            path: path.into(),
            problem: problem.into(),
        });
        self
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self.code {
            ErrorCode::NotAuthenticated | ErrorCode::SessionInvalid | ErrorCode::SessionExpired => {
                StatusCode::UNAUTHORIZED
            }
            code => code.kind().http_status(),
        }
    }

    // ==================== Convenience constructors ====================

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    /// Validation error pointing at a single field
    pub fn invalid_field(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let path = path.into();
        let problem = problem.into();
        Self::with_message(ErrorCode::ValidationFailed, format!("{path}: {problem}"))
            .with_detail(path, problem)
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::PermissionDenied, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::AlreadyExists, msg)
    }

    pub fn feature_disabled(module: &str) -> Self {
        Self::with_message(
            ErrorCode::FeatureDisabled,
            format!("Module '{module}' is disabled for this venue"),
        )
    }
}

/// Serialized body of an error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            ok: false,
            code: err.code,
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

/// Success envelope: `{ "ok": true, "<key>": <data> }`
///
/// The key names the entity (`order`, `payments`, `ticket`, ...).
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub key: &'static str,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(key: &'static str, data: T) -> Self {
        Self { key, data }
    }
}

impl ApiResponse<()> {
    /// Success response without payload: `{ "ok": true }`
    pub fn ok() -> Self {
        Self { key: "", data: () }
    }
}

impl<T: Serialize> Serialize for ApiResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("ok", &true)?;
        if !self.key.is_empty() {
            map.serialize_entry(self.key, &self.data)?;
        }
        map.end()
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

// ===== Axum Integration =====

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = self.http_status();
        let body = ErrorBody::from(&self);

        if self.code.kind().is_server_fault() {
            tracing::error!(
                code = %self.code,
                message = %self.message,
                "System error occurred"
            );
        }

        (status, Json(body)).into_response()
    }
}

impl<T: Serialize> axum::response::IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::OK, axum::Json(self)).into_response()
    }
}
