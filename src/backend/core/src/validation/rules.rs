//! Validation rules for common data validation scenarios.
//!
//! Rules are small reusable checks over a single value. Schemas attach them to
//! fields; each rule reports at most one [`FieldError`] so a field can collect
//! several independent violations in one pass.

use crate::security::detector::EVENT_HANDLERS;
use crate::validation::error::{FieldError, ValidationErrorKind};
use regex::Regex;
use std::fmt::Debug;
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════════
// Pre-compiled Regex Patterns
// ═══════════════════════════════════════════════════════════════════════════════

/// Email shape: local part, `@`, dotted domain with at least one label separator.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    ).expect("Invalid email regex")
});

/// HTTPS URL with a dotted host, optional port and a path free of quotes and angle brackets.
static HTTPS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^https://[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+(?::\d{1,5})?(?:[/?#][^\s<>"']*)?$"#
    ).expect("Invalid URL regex")
});

/// Script tags, script protocols and inline handler assignments.
static ACTIVE_CONTENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)<\s*/?\s*script\b|\b(?:java|vb)script\s*:|\bon(?:{})\s*=",
        EVENT_HANDLERS
    ))
    .expect("Invalid active content regex")
});

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Rule Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A validation rule that can be applied to a value.
pub trait ValidationRule<T: ?Sized>: Debug + Send + Sync {
    /// Validate the value and return the violation, if any.
    fn validate(&self, value: &T) -> Option<FieldError>;

    /// Get a description of this rule.
    fn description(&self) -> String;
}

// ═══════════════════════════════════════════════════════════════════════════════
// String Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum length in characters.
#[derive(Debug, Clone)]
pub struct MinLength(pub usize);

impl ValidationRule<str> for MinLength {
    fn validate(&self, value: &str) -> Option<FieldError> {
        let len = value.chars().count();
        (len < self.0).then(|| {
            FieldError::new(ValidationErrorKind::MinLength {
                min: self.0,
                actual: len,
            })
        })
    }

    fn description(&self) -> String {
        format!("minimum length: {}", self.0)
    }
}

/// Maximum length in characters.
#[derive(Debug, Clone)]
pub struct MaxLength(pub usize);

impl ValidationRule<str> for MaxLength {
    fn validate(&self, value: &str) -> Option<FieldError> {
        let len = value.chars().count();
        (len > self.0).then(|| {
            FieldError::new(ValidationErrorKind::MaxLength {
                max: self.0,
                actual: len,
            })
        })
    }

    fn description(&self) -> String {
        format!("maximum length: {}", self.0)
    }
}

/// Email address shape. Angle brackets are always rejected.
#[derive(Debug, Clone)]
pub struct Email;

impl ValidationRule<str> for Email {
    fn validate(&self, value: &str) -> Option<FieldError> {
        if value.contains('<') || value.contains('>') || !EMAIL_REGEX.is_match(value) {
            Some(FieldError::new(ValidationErrorKind::InvalidEmail))
        } else {
            None
        }
    }

    fn description(&self) -> String {
        "valid email address".to_string()
    }
}

/// Absolute `https://` URL.
#[derive(Debug, Clone)]
pub struct HttpsUrl;

impl ValidationRule<str> for HttpsUrl {
    fn validate(&self, value: &str) -> Option<FieldError> {
        (!HTTPS_URL_REGEX.is_match(value))
            .then(|| FieldError::with_message(ValidationErrorKind::InvalidUrl, "must be a valid HTTPS URL"))
    }

    fn description(&self) -> String {
        "valid HTTPS URL".to_string()
    }
}

/// Rule that validates against a custom regex pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    description: String,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            description: format!("matching pattern {}", pattern),
        })
    }

    pub fn with_description(pattern: &str, description: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            description: description.into(),
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl ValidationRule<str> for Pattern {
    fn validate(&self, value: &str) -> Option<FieldError> {
        (!self.regex.is_match(value)).then(|| {
            FieldError::new(ValidationErrorKind::Pattern {
                description: self.description.clone(),
            })
        })
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Rejects embedded script tags, script protocols and inline event handlers.
#[derive(Debug, Clone)]
pub struct NoActiveContent;

impl ValidationRule<str> for NoActiveContent {
    fn validate(&self, value: &str) -> Option<FieldError> {
        ACTIVE_CONTENT_REGEX.is_match(value).then(|| {
            FieldError::new(ValidationErrorKind::Forbidden {
                reason: "script or event handler content".to_string(),
            })
        })
    }

    fn description(&self) -> String {
        "no script or event handler content".to_string()
    }
}

/// Rejects `..` sequences.
#[derive(Debug, Clone)]
pub struct NoTraversal;

impl ValidationRule<str> for NoTraversal {
    fn validate(&self, value: &str) -> Option<FieldError> {
        value.contains("..").then(|| {
            FieldError::new(ValidationErrorKind::Forbidden {
                reason: "'..' sequences".to_string(),
            })
        })
    }

    fn description(&self) -> String {
        "no '..' sequences".to_string()
    }
}

/// Requires at least one uppercase letter, one lowercase letter and one digit.
///
/// All missing classes are reported in a single error.
#[derive(Debug, Clone)]
pub struct PasswordStrength;

impl ValidationRule<str> for PasswordStrength {
    fn validate(&self, value: &str) -> Option<FieldError> {
        let mut missing = Vec::new();
        if !value.chars().any(|c| c.is_ascii_uppercase()) {
            missing.push("an uppercase letter");
        }
        if !value.chars().any(|c| c.is_ascii_lowercase()) {
            missing.push("a lowercase letter");
        }
        if !value.chars().any(|c| c.is_ascii_digit()) {
            missing.push("a digit");
        }
        if missing.is_empty() {
            return None;
        }

        Some(FieldError::with_message(
            ValidationErrorKind::Custom {
                code: "weak_password".to_string(),
            },
            format!("must contain {}", missing.join(", ")),
        ))
    }

    fn description(&self) -> String {
        "uppercase, lowercase and digit".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Numeric Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Inclusive lower bound.
#[derive(Debug, Clone, Copy)]
pub struct Min(pub f64);

impl ValidationRule<f64> for Min {
    fn validate(&self, value: &f64) -> Option<FieldError> {
        (*value < self.0).then(|| {
            FieldError::new(ValidationErrorKind::MinValue {
                min: self.0.to_string(),
                actual: value.to_string(),
            })
        })
    }

    fn description(&self) -> String {
        format!("minimum value: {}", self.0)
    }
}

/// Inclusive upper bound.
#[derive(Debug, Clone, Copy)]
pub struct Max(pub f64);

impl ValidationRule<f64> for Max {
    fn validate(&self, value: &f64) -> Option<FieldError> {
        (*value > self.0).then(|| {
            FieldError::new(ValidationErrorKind::MaxValue {
                max: self.0.to_string(),
                actual: value.to_string(),
            })
        })
    }

    fn description(&self) -> String {
        format!("maximum value: {}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
