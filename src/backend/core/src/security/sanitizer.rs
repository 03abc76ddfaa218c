//! Idempotent text filter.
//!
//! [`Sanitizer::filter`] applies, in order:
//!
//! 1. control character removal
//! 2. removal of script elements, `javascript:`/`vbscript:`/`data:text/html`
//!    prefixes and event-handler assignments, repeated until nothing matches
//! 3. HTML entity escaping of `& < > " ' /`, leaving existing entities intact
//! 4. whitespace collapsing and trimming
//!
//! Every step is idempotent on the output of the steps that follow it, so
//! `filter(filter(x)) == filter(x)`.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::LazyLock;

use super::detector::{PatternDetector, EVENT_HANDLERS};
use super::{json_kind, InputError};

/// Explicit-error variant for dynamically typed input.
pub type SanitizeError = InputError;

static SCRIPT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("Invalid script element regex")
});

static SCRIPT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*script\b[^>]*>?").expect("Invalid script tag regex")
});

static DANGEROUS_PROTOCOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:java|vb)script\s*:|data\s*:\s*text/html").expect("Invalid protocol regex")
});

static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)\bon(?:{})\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#,
        EVENT_HANDLERS
    ))
    .expect("Invalid event handler regex")
});

// ═══════════════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of sanitising a single string with diagnostics.
///
/// `sanitized_length` may exceed `original_length`: escaping grows text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationOutcome {
    pub sanitized: String,
    /// True when the original input tripped no detector signature.
    pub is_secure: bool,
    /// Signature names that matched the original input.
    pub issues: Vec<String>,
    pub original_length: usize,
    pub sanitized_length: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sanitizer
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless text sanitizer.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    detector: PatternDetector,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizer whose outcome diagnostics use the given detector.
    pub fn with_detector(detector: PatternDetector) -> Self {
        Self { detector }
    }

    /// Filter a string. Never fails and is idempotent.
    pub fn filter(&self, input: &str) -> String {
        let stripped = strip_control_chars(input);
        let removed = remove_active_content(&stripped);
        let escaped = escape_html(&removed);
        collapse_whitespace(&escaped)
    }

    /// Filter a dynamic value, rejecting anything that is not a string.
    pub fn filter_value(&self, value: &Value) -> Result<String, SanitizeError> {
        match value {
            Value::String(s) => Ok(self.filter(s)),
            other => Err(InputError::NotAString(json_kind(other))),
        }
    }

    /// Filter with diagnostics about what the original input contained.
    pub fn sanitize_outcome(&self, input: &str) -> SanitizationOutcome {
        let issues: Vec<String> = self
            .detector
            .scan(input)
            .into_iter()
            .map(|f| format!("{}:{}", f.category.as_str(), f.signature))
            .collect();
        let sanitized = self.filter(input);
        SanitizationOutcome {
            is_secure: issues.is_empty(),
            issues,
            original_length: input.chars().count(),
            sanitized_length: sanitized.chars().count(),
            sanitized,
        }
    }

    /// Sanitise every string leaf of a JSON tree, object keys included.
    ///
    /// Numbers, booleans and nulls pass through unchanged.
    pub fn sanitize_json(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.filter(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.sanitize_json(v)).collect())
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, v) in map {
                    out.insert(self.filter(&key), self.sanitize_json(v));
                }
                Value::Object(out)
            }
            other => other,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════════════════════════

fn strip_control_chars(input: &str) -> Cow<'_, str> {
    if input.chars().any(is_stripped_control) {
        Cow::Owned(input.chars().filter(|c| !is_stripped_control(*c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

// Whitespace controls survive until the collapse step turns them into spaces.
fn is_stripped_control(c: char) -> bool {
    c.is_control() && !c.is_whitespace()
}

// Runs to a fixed point. Every pass that changes the text deletes at least one
// non-empty match, so the loop ends after at most `input.len()` passes.
fn remove_active_content(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = SCRIPT_ELEMENT.replace_all(&current, "");
        let next = SCRIPT_TAG.replace_all(&next, "");
        let next = DANGEROUS_PROTOCOL.replace_all(&next, "");
        let next = EVENT_HANDLER.replace_all(&next, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for (i, c) in input.char_indices() {
        match c {
            '&' if starts_entity(&input[i..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            c => out.push(c),
        }
    }
    out
}

/// True when `s` (starting at `&`) begins with a complete character reference:
/// `&name;`, `&#123;` or `&#x1F;`.
fn starts_entity(s: &str) -> bool {
    let body = &s[1..];
    let Some(end) = body.find(';') else {
        return false;
    };
    let name = &body[..end];
    if let Some(num) = name.strip_prefix('#') {
        if let Some(hex) = num.strip_prefix(['x', 'X']) {
            return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        }
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
