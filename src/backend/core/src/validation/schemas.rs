//! Built-in field specs and request schemas.
//!
//! Field builders return a fresh [`FieldSpec`] that callers can tighten further.
//! Composite schemas are built once and shared.

use std::sync::LazyLock;

use crate::validation::rules::{Email, HttpsUrl, NoActiveContent, NoTraversal, PasswordStrength};
use crate::validation::schema::{FieldSpec, Schema};

pub const EMAIL_MAX: usize = 254;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 128;
pub const IDENTIFIER_MAX: usize = 100;
pub const URL_MAX: usize = 2048;
pub const MAX_NODE_IDS: usize = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// Field Specs
// ═══════════════════════════════════════════════════════════════════════════════

/// Kept unescaped: the shape rule already excludes markup.
pub fn email() -> FieldSpec {
    FieldSpec::string().trim().max_length(EMAIL_MAX).rule(Email).unescaped()
}

/// New-password rules. Passwords are never escaped.
pub fn password() -> FieldSpec {
    FieldSpec::string()
        .min_length(PASSWORD_MIN)
        .max_length(PASSWORD_MAX)
        .rule(PasswordStrength)
        .rule(NoActiveContent)
        .verbatim()
}

/// Alphanumerics, `_` and `-`.
pub fn identifier() -> FieldSpec {
    FieldSpec::string()
        .min_length(1)
        .max_length(IDENTIFIER_MAX)
        .pattern(r"^[A-Za-z0-9_-]*$", "letters, digits, '_' or '-'")
        .rule(NoTraversal)
}

/// Free text without script or handler content.
///
/// `max` bounds the submitted text. The sanitised copy may be longer once
/// `&`, quotes and slashes are escaped.
pub fn safe_text(max: usize) -> FieldSpec {
    FieldSpec::string().trim().max_length(max).rule(NoActiveContent)
}

/// Kept unescaped: the URL rule rejects quotes, angle brackets and whitespace.
pub fn https_url() -> FieldSpec {
    FieldSpec::string().trim().max_length(URL_MAX).rule(HttpsUrl).unescaped()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request Schemas
// ═══════════════════════════════════════════════════════════════════════════════

static SIGNUP: LazyLock<Schema> = LazyLock::new(|| {
    Schema::builder()
        .field("email", email())
        .field("password", password())
        .field("confirmPassword", FieldSpec::string().max_length(PASSWORD_MAX).verbatim())
        .field("displayName", safe_text(50).min_length(1).optional())
        .must_match("confirmPassword", "password")
        .build()
        .expect("Invalid signup schema")
});

static LOGIN: LazyLock<Schema> = LazyLock::new(|| {
    Schema::builder()
        .field("email", email())
        .field(
            "password",
            FieldSpec::string().min_length(1).max_length(PASSWORD_MAX).verbatim(),
        )
        .build()
        .expect("Invalid login schema")
});

static CONTACT: LazyLock<Schema> = LazyLock::new(|| {
    Schema::builder()
        .field("name", safe_text(100).min_length(1))
        .field("email", email())
        .field("message", safe_text(5000).min_length(1))
        .build()
        .expect("Invalid contact schema")
});

static FILE_REQUEST: LazyLock<Schema> = LazyLock::new(|| {
    Schema::builder()
        .field("fileId", identifier())
        .field(
            "nodeIds",
            FieldSpec::array(identifier()).max_items(MAX_NODE_IDS).optional(),
        )
        .build()
        .expect("Invalid file request schema")
});

/// `email`, `password`, `confirmPassword` (must match), optional `displayName`.
pub fn signup() -> &'static Schema {
    &SIGNUP
}

pub fn login() -> &'static Schema {
    &LOGIN
}

pub fn contact() -> &'static Schema {
    &CONTACT
}

/// `fileId` plus up to 50 optional `nodeIds`.
pub fn file_request() -> &'static Schema {
    &FILE_REQUEST
}

/// Names accepted by [`by_name`].
pub const SCHEMA_NAMES: [&str; 4] = ["signup", "login", "contact", "file_request"];

/// Look up a built-in schema by name.
pub fn by_name(name: &str) -> Option<&'static Schema> {
    match name {
        "signup" => Some(signup()),
        "login" => Some(login()),
        "contact" => Some(contact()),
        "file_request" | "file-request" => Some(file_request()),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_build() {
        for name in SCHEMA_NAMES {
            assert!(by_name(name).is_some(), "{name}");
        }
        assert!(by_name("nope").is_none());
    }

    #[test]
    fn test_signup_valid() {
        let out = signup()
            .validate(&json!({
                "email": "new@example.com",
                "password": "Str0ngPass",
                "confirmPassword": "Str0ngPass",
            }))
            .unwrap();
        assert_eq!(out["email"], "new@example.com");
        assert!(out.get("displayName").is_none());
    }

    #[test]
    fn test_two_violations_two_errors() {
        let errors = login()
            .validate(&json!({"email": "not-an-email"}))
            .unwrap_err();
        assert_eq!(errors.len(), 2);

        let errors = signup()
            .validate(&json!({
                "email": "bad",
                "password": "Ab1",
                "confirmPassword": "Ab1",
            }))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.has_errors("email"));
        assert!(errors.has_errors("password"));
    }

    #[test]
    fn test_signup_mismatch() {
        let errors = signup()
            .validate(&json!({
                "email": "new@example.com",
                "password": "Str0ngPass",
                "confirmPassword": "Str0ngPas",
            }))
            .unwrap_err();
        assert_eq!(errors.get("confirmPassword")[0].code(), "mismatch");
    }

    #[test]
    fn test_password_rejects_script() {
        let errors = signup()
            .validate(&json!({
                "email": "new@example.com",
                "password": "Aa1<script>",
                "confirmPassword": "Aa1<script>",
            }))
            .unwrap_err();
        assert_eq!(errors.get("password")[0].code(), "forbidden_content");
    }

    #[test]
    fn test_email_limits() {
        let long = format!("{}@example.com", "a".repeat(250));
        let errors = login()
            .validate(&json!({"email": long, "password": "x"}))
            .unwrap_err();
        assert_eq!(errors.get("email")[0].code(), "too_long");

        let errors = login()
            .validate(&json!({"email": "a<b>@example.com", "password": "x"}))
            .unwrap_err();
        assert_eq!(errors.get("email")[0].code(), "invalid_email");
    }

    #[test]
    fn test_identifier() {
        let schema = file_request();
        assert!(schema.validate(&json!({"fileId": "abc123DEF_-"})).is_ok());
        assert!(schema.validate(&json!({"fileId": "a..b"})).is_err());
        assert!(schema.validate(&json!({"fileId": "a".repeat(101)})).is_err());
        assert!(schema.validate(&json!({"fileId": ""})).is_err());
    }

    #[test]
    fn test_node_ids_limit() {
        let ids: Vec<String> = (0..51).map(|i| format!("node-{i}")).collect();
        let errors = file_request()
            .validate(&json!({"fileId": "f1", "nodeIds": ids}))
            .unwrap_err();
        assert_eq!(errors.get("nodeIds")[0].code(), "too_many_items");

        let errors = file_request()
            .validate(&json!({"fileId": "f1", "nodeIds": ["ok", "../x"]}))
            .unwrap_err();
        assert!(errors.has_errors("nodeIds[1]"));
    }

    #[test]
    fn test_contact_rejects_handlers() {
        let errors = contact()
            .validate(&json!({
                "name": "Eve",
                "email": "eve@example.com",
                "message": "<img src=x onerror=alert(1)>",
            }))
            .unwrap_err();
        assert!(errors.has_errors("message"));
    }

    #[test]
    fn test_https_url() {
        let schema = Schema::builder().field("url", https_url()).build().unwrap();
        assert!(schema.validate(&json!({"url": "https://example.com/a"})).is_ok());
        assert!(schema.validate(&json!({"url": "http://example.com"})).is_err());
    }
}
