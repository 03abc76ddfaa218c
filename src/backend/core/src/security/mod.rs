//! Request security primitives.
//!
//! - [`detector`]: static signature matching for injection payloads
//! - [`sanitizer`]: idempotent text filter and recursive JSON sanitisation
//! - [`events`]: structured security event logging with redaction
//! - [`csrf`]: anti-forgery token issue and verification
//! - [`rate_limit`]: fixed-window request counting per client key

pub mod csrf;
pub mod detector;
pub mod events;
pub mod rate_limit;
pub mod sanitizer;

pub use csrf::{CookieOptions, CookieStore, CsrfConfig, CsrfFailure, CsrfManager, CsrfToken, CsrfVerdict};
pub use detector::{Detection, Finding, PatternDetector, ThreatCategory};
pub use events::{
    ChannelSink, EventContext, EventSink, MemorySink, Redaction, SecurityEvent,
    SecurityEventLogger, SecurityEventType, TracingSink,
};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitKey, RateLimitPolicy, RateLimiter};
pub use sanitizer::{SanitizationOutcome, SanitizeError, Sanitizer};

use serde_json::Value;
use thiserror::Error;

/// Raised when a security function receives a value it cannot inspect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("expected a string, found {0}")]
    NotAString(&'static str),
}

/// JSON type name, for error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
