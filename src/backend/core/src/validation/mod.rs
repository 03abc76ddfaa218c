//! Structured validation of untyped request bodies.
//!
//! This module provides:
//!
//! - **Schemas**: field types, presence, length and range limits, regex
//!   patterns, cross-field refinements and unknown-key handling
//!   (`schema`)
//! - **Rules**: reusable string and numeric checks (`rules`)
//! - **Built-ins**: email, password, identifier, safe text and HTTPS URL
//!   fields plus the signup, login, contact and file request forms
//!   (`schemas`)
//! - **Errors**: ordered field-level errors with dotted and indexed paths
//!   (`error`)
//!
//! Validation never fails fast. Every violated constraint produces its own
//! error so a client can show all problems at once. Malformed data is a
//! validation failure. Only a malformed schema is an error of its own kind.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bastion_core::validation::{schemas, validate};
//! use serde_json::json;
//!
//! #[derive(serde::Deserialize)]
//! struct Login {
//!     email: String,
//!     password: String,
//! }
//!
//! let body = json!({"email": "user@example.com", "password": "hunter2"});
//! match validate::<Login>(schemas::login(), &body) {
//!     Ok(login) => println!("welcome {}", login.email),
//!     Err(errors) => {
//!         for (field, error) in errors.iter() {
//!             println!("{}: {}", field, error.message);
//!         }
//!     }
//! }
//! ```

pub mod error;
pub mod rules;
pub mod schema;
pub mod schemas;

// ═══════════════════════════════════════════════════════════════════════════════
// Re-exports
// ═══════════════════════════════════════════════════════════════════════════════

pub use error::{FieldError, ValidationErrorKind, ValidationErrors, ValidationResult};
pub use rules::{
    Email, HttpsUrl, Max, MaxLength, Min, MinLength, NoActiveContent, NoTraversal,
    PasswordStrength, Pattern, ValidationRule,
};
pub use schema::{FieldKind, FieldSpec, Schema, SchemaBuilder, SchemaError, BODY_FIELD};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Validate `data` against `schema` and deserialize the cleaned result.
pub fn validate<T: DeserializeOwned>(schema: &Schema, data: &Value) -> ValidationResult<T> {
    schema.validate_into(data)
}
