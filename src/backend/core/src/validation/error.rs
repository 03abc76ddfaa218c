//! Field-level validation errors.
//!
//! Errors are kept in the order they were produced so a client sees them in
//! schema order. Paths use dots for nested objects and brackets for array
//! items (`address.street`, `nodeIds[3]`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorDetail;

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// The kind of validation error that occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Field is required but was missing, null or blank.
    Required,
    /// Value has the wrong JSON type.
    InvalidType { expected: String, actual: String },
    MinLength { min: usize, actual: usize },
    MaxLength { max: usize, actual: usize },
    MinValue { min: String, actual: String },
    MaxValue { max: String, actual: String },
    InvalidEmail,
    InvalidUrl,
    /// Value does not match the expected pattern.
    Pattern { description: String },
    MinItems { min: usize, actual: usize },
    MaxItems { max: usize, actual: usize },
    /// Value must equal another field.
    Mismatch { other: String },
    /// Key is not part of the schema.
    UnknownField,
    /// Value contains content the field never accepts.
    Forbidden { reason: String },
    /// Custom validation failed.
    Custom { code: String },
}

impl ValidationErrorKind {
    /// Stable machine-readable code, surfaced as `details[].code`.
    pub fn code(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::InvalidType { .. } => "invalid_type",
            Self::MinLength { .. } => "too_short",
            Self::MaxLength { .. } => "too_long",
            Self::MinValue { .. } => "too_small",
            Self::MaxValue { .. } => "too_big",
            Self::InvalidEmail => "invalid_email",
            Self::InvalidUrl => "invalid_url",
            Self::Pattern { .. } => "invalid_format",
            Self::MinItems { .. } => "too_few_items",
            Self::MaxItems { .. } => "too_many_items",
            Self::Mismatch { .. } => "mismatch",
            Self::UnknownField => "unknown_field",
            Self::Forbidden { .. } => "forbidden_content",
            Self::Custom { code } => code,
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "field is required"),
            Self::InvalidType { expected, actual } => {
                write!(f, "expected {}, received {}", expected, actual)
            }
            Self::MinLength { min, actual } => {
                write!(f, "must be at least {} characters (got {})", min, actual)
            }
            Self::MaxLength { max, actual } => {
                write!(f, "must be at most {} characters (got {})", max, actual)
            }
            Self::MinValue { min, actual } => {
                write!(f, "must be at least {} (got {})", min, actual)
            }
            Self::MaxValue { max, actual } => {
                write!(f, "must be at most {} (got {})", max, actual)
            }
            Self::InvalidEmail => write!(f, "must be a valid email address"),
            Self::InvalidUrl => write!(f, "must be a valid URL"),
            Self::Pattern { description } => write!(f, "must be {}", description),
            Self::MinItems { min, actual } => {
                write!(f, "must have at least {} items (got {})", min, actual)
            }
            Self::MaxItems { max, actual } => {
                write!(f, "must have at most {} items (got {})", max, actual)
            }
            Self::Mismatch { other } => write!(f, "must match {}", other),
            Self::UnknownField => write!(f, "is not an allowed field"),
            Self::Forbidden { reason } => write!(f, "must not contain {}", reason),
            Self::Custom { code } => write!(f, "validation failed: {}", code),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field Error
// ═══════════════════════════════════════════════════════════════════════════════

/// A single validation error for a specific field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub kind: ValidationErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl FieldError {
    pub fn new(kind: ValidationErrorKind) -> Self {
        let message = kind.to_string();
        Self {
            kind,
            message,
        }
    }

    pub fn with_message(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        self.kind.code()
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Errors Collection
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered collection of `(field path, error)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<(String, FieldError)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of errors across all fields.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Number of distinct fields with errors.
    pub fn field_count(&self) -> usize {
        let mut fields: Vec<&str> = self.errors.iter().map(|(f, _)| f.as_str()).collect();
        fields.sort_unstable();
        fields.dedup();
        fields.len()
    }

    pub fn add(&mut self, field: impl Into<String>, error: FieldError) {
        self.errors.push((field.into(), error));
    }

    pub fn add_error(&mut self, field: impl Into<String>, kind: ValidationErrorKind) {
        self.add(field, FieldError::new(kind));
    }

    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add_error(field, ValidationErrorKind::Required);
    }

    /// Errors for one field path.
    pub fn get(&self, field: &str) -> Vec<&FieldError> {
        self.errors
            .iter()
            .filter(|(f, _)| f == field)
            .map(|(_, e)| e)
            .collect()
    }

    pub fn has_errors(&self, field: &str) -> bool {
        self.errors.iter().any(|(f, _)| f == field)
    }

    /// True when `field` or anything nested under it has errors.
    pub fn has_errors_under(&self, field: &str) -> bool {
        self.errors.iter().any(|(f, _)| {
            f == field
                || f.strip_prefix(field)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldError)> {
        self.errors.iter().map(|(f, e)| (f.as_str(), e))
    }

    /// `field: message` lines.
    pub fn to_flat_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|(field, e)| format!("{}: {}", field, e.message))
            .collect()
    }

    /// Error body `details` entries, one per error.
    pub fn to_details(&self) -> Vec<ErrorDetail> {
        self.errors
            .iter()
            .map(|(field, e)| ErrorDetail {
                field: field.clone(),
                message: e.message.clone(),
                code: Some(e.code().to_string()),
            })
            .collect()
    }

    /// `Ok(value)` when empty, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> ValidationResult<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_flat_messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = (String, FieldError);
    type IntoIter = std::vec::IntoIter<(String, FieldError)>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Result Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Exactly one of typed data or the full list of field errors.
pub type ValidationResult<T> = std::result::Result<T, ValidationErrors>;

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_display() {
        let error = FieldError::new(ValidationErrorKind::Required);
        assert_eq!(error.to_string(), "field is required");

        let error = FieldError::new(ValidationErrorKind::MinLength { min: 3, actual: 1 });
        assert_eq!(error.to_string(), "must be at least 3 characters (got 1)");
    }

    #[test]
    fn test_errors_keep_insertion_order() {
        let mut errors = ValidationErrors::new();
        errors.add_required("zeta");
        errors.add_error("alpha", ValidationErrorKind::InvalidEmail);
        errors.add_error("zeta", ValidationErrorKind::MaxLength { max: 1, actual: 2 });

        let fields: Vec<&str> = errors.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["zeta", "alpha", "zeta"]);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.field_count(), 2);
        assert_eq!(errors.get("zeta").len(), 2);
    }

    #[test]
    fn test_errors_under_nested_paths() {
        let mut errors = ValidationErrors::new();
        errors.add_required("address.street");
        errors.add_error("nodeIds[3]", ValidationErrorKind::InvalidType {
            expected: "string".into(),
            actual: "number".into(),
        });

        assert!(errors.has_errors_under("address"));
        assert!(errors.has_errors_under("nodeIds"));
        assert!(!errors.has_errors_under("node"));
        assert!(!errors.has_errors("address"));
    }

    #[test]
    fn test_to_details() {
        let mut errors = ValidationErrors::new();
        errors.add_error("email", ValidationErrorKind::InvalidEmail);
        errors.add("password", FieldError::new(ValidationErrorKind::Required));

        let details = errors.to_details();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].field, "email");
        assert_eq!(details[0].message, "must be a valid email address");
        assert_eq!(details[0].code.as_deref(), Some("invalid_email"));
        assert_eq!(details[1].code.as_deref(), Some("required"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ValidationErrors::new().into_result(5).unwrap(), 5);

        let mut errors = ValidationErrors::new();
        errors.add_required("x");
        assert!(errors.into_result(5).is_err());
    }

    #[test]
    fn test_display_joins_messages() {
        let mut errors = ValidationErrors::new();
        errors.add_required("a");
        errors.add_error("b", ValidationErrorKind::UnknownField);
        assert_eq!(errors.to_string(), "a: field is required; b: is not an allowed field");
    }
}
