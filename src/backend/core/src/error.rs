//! Error handling for Bastion.
//!
//! This module provides:
//! - A stable, machine-readable error taxonomy (`ErrorCode`)
//! - HTTP status code mapping for pipeline rejections
//! - User-facing messages kept apart from internal diagnostics
//! - Correlation ids so internal failures can be traced without leaking detail
//!
//! # Usage
//!
//! ```rust,ignore
//! use bastion_core::error::{BastionError, ErrorCode, Result};
//!
//! fn load() -> Result<()> {
//!     Err(BastionError::configuration("csrf.secret is not set"))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Bastion operations.
pub type Result<T> = std::result::Result<T, BastionError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// The four request-facing codes are part of the public wire contract and must
/// not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input does not match the route schema.
    ValidationError,
    /// Input carries an attack signature.
    SecurityError,
    /// Client exceeded its request quota.
    RateLimitExceeded,
    /// Anti-forgery token missing, malformed, expired or mismatched.
    CsrfError,
    /// Unexpected failure inside the pipeline.
    InternalError,
    /// Deployment defect detected at startup.
    ConfigurationError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::ValidationError | Self::SecurityError => StatusCode::BAD_REQUEST,
            Self::CsrfError => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError | Self::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire name, as it appears in the `code` field of error bodies.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SecurityError => "SECURITY_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::CsrfError => "CSRF_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// Default client-facing message for this code.
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::ValidationError => "Validation failed",
            Self::SecurityError => "Security validation failed",
            Self::RateLimitExceeded => "Too many requests. Please try again later.",
            Self::CsrfError => "Invalid or missing CSRF token",
            Self::InternalError => "An internal error occurred",
            Self::ConfigurationError => "Service is misconfigured",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Bad input from the client
    Low,
    /// Abuse signals (attack signatures, quota, forgery)
    Medium,
    /// Failures that require operator attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError => Self::Low,
            ErrorCode::SecurityError | ErrorCode::RateLimitExceeded | ErrorCode::CsrfError => {
                Self::Medium
            }
            ErrorCode::InternalError | ErrorCode::ConfigurationError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field-level Detail
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of the `details` array in an error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Bastion.
///
/// The user message is the only text that ever reaches a client. Internal
/// messages and sources are for server-side logs, keyed by `correlation_id`.
#[derive(Error, Debug)]
pub struct BastionError {
    code: ErrorCode,
    user_message: Cow<'static, str>,
    internal_message: Option<String>,
    details: Vec<ErrorDetail>,
    correlation_id: Uuid,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for BastionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl BastionError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: Vec::new(),
            correlation_id: Uuid::new_v4(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error carrying the default message for its code.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Create an internal error (500). The message is never shown to clients.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InternalError).with_internal_message(message)
    }

    /// Create a configuration error. Raised at startup, never per request.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::ConfigurationError).with_internal_message(message)
    }

    /// Create a validation error with field-level details.
    pub fn validation(details: Vec<ErrorDetail>) -> Self {
        Self::from_code(ErrorCode::ValidationError).with_details(details)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the field-level details.
    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Build the client-facing body. Internal errors expose only the
    /// correlation id, as `requestId`.
    pub fn to_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(self.code, self.user_message.to_string());
        if !self.details.is_empty() {
            response.details = Some(self.details.clone());
        }
        if self.code == ErrorCode::InternalError {
            response.request_id = Some(self.correlation_id.to_string());
        }
        response
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let status = self.http_status().as_u16();
        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %self.code,
                    http_status = status,
                    correlation_id = %self.correlation_id,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Pipeline failure"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %self.code,
                    http_status = status,
                    correlation_id = %self.correlation_id,
                    "Request rejected"
                );
            }
            ErrorSeverity::Low => {
                debug!(
                    error_code = %self.code,
                    http_status = status,
                    field_errors = self.details.len(),
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "bastion_errors_total",
            "code" => self.code.as_str(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON body returned on any pipeline rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ErrorDetail>>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    /// Attach a request id (set by the hosting layer when it has one).
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for BastionError {
    fn into_response(self) -> Response {
        self.log();
        (self.http_status(), Json(self.to_response())).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::ValidationError.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::SecurityError.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::CsrfError.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::InternalError.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        let json = serde_json::to_string(&ErrorCode::CsrfError).unwrap();
        assert_eq!(json, "\"CSRF_ERROR\"");
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = BastionError::internal("regex engine exploded at offset 12");
        let body = err.to_response();
        assert_eq!(body.error, "An internal error occurred");
        assert_eq!(body.request_id, Some(err.correlation_id().to_string()));

        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("regex engine"));
    }

    #[test]
    fn test_validation_error_body_shape() {
        let err = BastionError::validation(vec![ErrorDetail {
            field: "email".into(),
            message: "must be a valid email address".into(),
            code: Some("invalid_email".into()),
        }]);
        let value = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(value["code"], "VALIDATION_ERROR");
        assert_eq!(value["details"][0]["field"], "email");
        assert!(value.get("requestId").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_display_includes_internal_message() {
        let err = BastionError::configuration("csrf.secret missing");
        let text = err.to_string();
        assert!(text.contains("CONFIGURATION_ERROR"));
        assert!(text.contains("csrf.secret missing"));
    }

    #[test]
    fn test_severity_from_code() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::ValidationError), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::CsrfError), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::InternalError), ErrorSeverity::Critical);
    }
}
