//! Declarative schemas for JSON request bodies.
//!
//! A [`Schema`] describes an object: its fields, their types and constraints,
//! cross-field refinements and what to do with unknown keys. Validation is
//! exhaustive. Every violated constraint is reported, and the output is a
//! cleaned copy of the input (unknown keys stripped, strings trimmed where
//! requested).
//!
//! Schemas are checked when built. An inconsistent schema (min above max,
//! duplicate field, bad regex) is a [`SchemaError`], never a validation error.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::security::json_kind;
use crate::validation::error::{FieldError, ValidationErrorKind, ValidationErrors, ValidationResult};
use crate::validation::rules::{Max, MaxLength, Min, MinLength, Pattern, ValidationRule};

/// Field path used for errors about the body as a whole.
pub const BODY_FIELD: &str = "body";

// ═══════════════════════════════════════════════════════════════════════════════
// Schema Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// A malformed schema. Always a programming error.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field '{field}': minimum {constraint} is greater than maximum")]
    MinGreaterThanMax { field: String, constraint: &'static str },

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}': invalid pattern")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("refinement targets undeclared field '{0}'")]
    UnknownRefinementField(String),

    #[error("field '{field}': {constraint} does not apply to {kind} fields")]
    InapplicableConstraint {
        field: String,
        constraint: &'static str,
        kind: &'static str,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field Specification
// ═══════════════════════════════════════════════════════════════════════════════

/// The JSON type a field must have.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Number,
    /// A number with no fractional part.
    Integer,
    Boolean,
    Array(Box<FieldSpec>),
    Object(Arc<Schema>),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

type StringRule = Arc<dyn ValidationRule<str>>;

/// Type and constraints for one field (or one array item).
#[derive(Debug, Clone)]
pub struct FieldSpec {
    kind: FieldKind,
    required: bool,
    verbatim: bool,
    unescaped: bool,
    trim: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    min_items: Option<usize>,
    max_items: Option<usize>,
    patterns: Vec<(String, String)>,
    rules: Vec<StringRule>,
}

impl FieldSpec {
    fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            verbatim: false,
            unescaped: false,
            trim: false,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            min_items: None,
            max_items: None,
            patterns: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::of(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldKind::Boolean)
    }

    pub fn array(item: FieldSpec) -> Self {
        Self::of(FieldKind::Array(Box::new(item)))
    }

    pub fn object(schema: impl Into<Arc<Schema>>) -> Self {
        Self::of(FieldKind::Object(schema.into()))
    }

    /// Missing or null values are accepted and omitted from the output.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Validated but never HTML-escaped nor fed to the generic injection scan.
    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    /// Still scanned for attack signatures, but never HTML-escaped.
    ///
    /// For values whose format rule already excludes markup (emails, URLs),
    /// where escaping would only corrupt a value that passed validation.
    pub fn unescaped(mut self) -> Self {
        self.unescaped = true;
        self
    }

    /// Trim surrounding whitespace before checking and in the output.
    pub fn trim(mut self) -> Self {
        self.trim = true;
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    /// Limit in characters of the submitted value. Sanitising may lengthen the
    /// stored value, since escaping turns one character into an entity.
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    /// Regex the whole value must match. Compiled when the schema is built.
    pub fn pattern(mut self, pattern: impl Into<String>, description: impl Into<String>) -> Self {
        self.patterns.push((pattern.into(), description.into()));
        self
    }

    /// Extra string rule, run after length and pattern checks.
    pub fn rule(mut self, rule: impl ValidationRule<str> + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_verbatim(&self) -> bool {
        self.verbatim
    }

    /// True when the sanitiser leaves this value as validated.
    pub fn is_unescaped(&self) -> bool {
        self.verbatim || self.unescaped
    }

    /// Item spec for array fields.
    pub fn item(&self) -> Option<&FieldSpec> {
        match &self.kind {
            FieldKind::Array(item) => Some(&**item),
            _ => None,
        }
    }

    /// Nested schema for object fields.
    pub fn schema(&self) -> Option<&Schema> {
        match &self.kind {
            FieldKind::Object(schema) => Some(&**schema),
            _ => None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Build-time checks
    // ─────────────────────────────────────────────────────────────────────────

    fn compile(mut self, field: &str) -> Result<Self, SchemaError> {
        let kind = self.kind.name();
        let inapplicable = |constraint| SchemaError::InapplicableConstraint {
            field: field.to_string(),
            constraint,
            kind,
        };

        let is_string = matches!(self.kind, FieldKind::String);
        let is_numeric = matches!(self.kind, FieldKind::Number | FieldKind::Integer);
        let is_array = matches!(self.kind, FieldKind::Array(_));

        if !is_string
            && (self.min_length.is_some() || self.max_length.is_some() || self.trim)
        {
            return Err(inapplicable("length"));
        }
        if !is_string && (self.verbatim || self.unescaped) {
            return Err(inapplicable("escaping"));
        }
        if !is_string && !(self.patterns.is_empty() && self.rules.is_empty()) {
            return Err(inapplicable("pattern"));
        }
        if !is_numeric && (self.min_value.is_some() || self.max_value.is_some()) {
            return Err(inapplicable("range"));
        }
        if !is_array && (self.min_items.is_some() || self.max_items.is_some()) {
            return Err(inapplicable("items"));
        }

        let inverted = |constraint| SchemaError::MinGreaterThanMax {
            field: field.to_string(),
            constraint,
        };
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(inverted("length"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(inverted("value"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_items, self.max_items) {
            if min > max {
                return Err(inverted("items"));
            }
        }

        for (pattern, description) in std::mem::take(&mut self.patterns) {
            let rule = Pattern::with_description(&pattern, description).map_err(|source| {
                SchemaError::InvalidPattern {
                    field: field.to_string(),
                    source,
                }
            })?;
            // Patterns run before custom rules.
            self.rules.insert(0, Arc::new(rule));
        }

        if let FieldKind::Array(item) = self.kind {
            self.kind = FieldKind::Array(Box::new(item.compile(&format!("{}[]", field))?));
        }

        Ok(self)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    fn check(&self, value: &Value, path: &str, errors: &mut ValidationErrors) -> Value {
        match (&self.kind, value) {
            (FieldKind::String, Value::String(s)) => {
                let s = if self.trim { s.trim() } else { s.as_str() };
                if let Some(err) = self.min_length.and_then(|n| MinLength(n).validate(s)) {
                    errors.add(path, err);
                }
                if let Some(err) = self.max_length.and_then(|n| MaxLength(n).validate(s)) {
                    errors.add(path, err);
                }
                for rule in &self.rules {
                    if let Some(err) = rule.validate(s) {
                        errors.add(path, err);
                    }
                }
                Value::String(s.to_string())
            }
            (FieldKind::Number, Value::Number(n)) => {
                self.check_range(n.as_f64().unwrap_or_default(), path, errors);
                value.clone()
            }
            (FieldKind::Integer, Value::Number(n)) => {
                let f = n.as_f64().unwrap_or_default();
                if n.is_i64() || n.is_u64() || f.fract() == 0.0 {
                    self.check_range(f, path, errors);
                } else {
                    errors.add(
                        path,
                        FieldError::new(ValidationErrorKind::InvalidType {
                            expected: "integer".to_string(),
                            actual: "number".to_string(),
                        }),
                    );
                }
                value.clone()
            }
            (FieldKind::Boolean, Value::Bool(_)) => value.clone(),
            (FieldKind::Array(item), Value::Array(items)) => {
                let count = items.len();
                if let Some(min) = self.min_items.filter(|min| count < *min) {
                    errors.add_error(path, ValidationErrorKind::MinItems { min, actual: count });
                }
                if let Some(max) = self.max_items.filter(|max| count > *max) {
                    errors.add_error(path, ValidationErrorKind::MaxItems { max, actual: count });
                }
                let out = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let item_path = format!("{}[{}]", path, i);
                        if v.is_null() {
                            errors.add_required(item_path);
                            Value::Null
                        } else {
                            item.check(v, &item_path, errors)
                        }
                    })
                    .collect();
                Value::Array(out)
            }
            (FieldKind::Object(schema), Value::Object(map)) => {
                Value::Object(schema.check_object(map, path, errors))
            }
            (kind, other) => {
                errors.add(
                    path,
                    FieldError::new(ValidationErrorKind::InvalidType {
                        expected: kind.name().to_string(),
                        actual: json_kind(other).to_string(),
                    }),
                );
                Value::Null
            }
        }
    }

    fn check_range(&self, value: f64, path: &str, errors: &mut ValidationErrors) {
        if let Some(err) = self.min_value.and_then(|min| Min(min).validate(&value)) {
            errors.add(path, err);
        }
        if let Some(err) = self.max_value.and_then(|max| Max(max).validate(&value)) {
            errors.add(path, err);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Refinements
// ═══════════════════════════════════════════════════════════════════════════════

type RefineFn = dyn Fn(&Map<String, Value>) -> bool + Send + Sync;

/// Cross-field check over the cleaned object. Reported against `field`.
#[derive(Clone)]
struct Refinement {
    field: String,
    error: FieldError,
    check: Arc<RefineFn>,
}

impl fmt::Debug for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refinement")
            .field("field", &self.field)
            .field("message", &self.error.message)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Schema
// ═══════════════════════════════════════════════════════════════════════════════

/// Object schema. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Arc<Vec<(String, FieldSpec)>>,
    refinements: Arc<Vec<Refinement>>,
    deny_unknown: bool,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, spec)| spec)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, spec)| (n.as_str(), spec))
    }

    pub fn denies_unknown_fields(&self) -> bool {
        self.deny_unknown
    }

    /// Validate a JSON body, returning the cleaned object or every field error.
    ///
    /// A non-object body is a single error on [`BODY_FIELD`].
    pub fn validate(&self, data: &Value) -> ValidationResult<Value> {
        let mut errors = ValidationErrors::new();
        let Value::Object(map) = data else {
            errors.add(
                BODY_FIELD,
                FieldError::new(ValidationErrorKind::InvalidType {
                    expected: "object".to_string(),
                    actual: json_kind(data).to_string(),
                }),
            );
            return Err(errors);
        };

        let out = self.check_object(map, "", &mut errors);
        errors.into_result(Value::Object(out))
    }

    /// Validate, then deserialize the cleaned object into `T`.
    pub fn validate_into<T: DeserializeOwned>(&self, data: &Value) -> ValidationResult<T> {
        let cleaned = self.validate(data)?;
        serde_json::from_value(cleaned).map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.add(
                BODY_FIELD,
                FieldError::with_message(
                    ValidationErrorKind::Custom {
                        code: "invalid_shape".to_string(),
                    },
                    e.to_string(),
                ),
            );
            errors
        })
    }

    fn check_object(
        &self,
        map: &Map<String, Value>,
        path: &str,
        errors: &mut ValidationErrors,
    ) -> Map<String, Value> {
        let child = |name: &str| {
            if path.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", path, name)
            }
        };

        let mut out = Map::new();
        for (name, spec) in self.fields.iter() {
            let field_path = child(name);
            match map.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        errors.add_required(field_path);
                    }
                }
                Some(value) => {
                    let cleaned = spec.check(value, &field_path, errors);
                    out.insert(name.clone(), cleaned);
                }
            }
        }

        if self.deny_unknown {
            for key in map.keys().filter(|k| self.field(k).is_none()) {
                errors.add_error(child(key), ValidationErrorKind::UnknownField);
            }
        }

        for refinement in self.refinements.iter() {
            let field_path = child(&refinement.field);
            if errors.has_errors_under(&field_path) {
                continue;
            }
            if !(refinement.check)(&out) {
                errors.add(field_path, refinement.error.clone());
            }
        }

        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Schema Builder
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldSpec)>,
    refinements: Vec<Refinement>,
    deny_unknown: bool,
}

impl SchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Reject unknown keys instead of stripping them.
    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    /// Cross-field check, reported against `field` with `message`.
    ///
    /// Skipped when `field` already has errors.
    pub fn refine<F>(mut self, field: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.refinements.push(Refinement {
            field: field.into(),
            error: FieldError::with_message(
                ValidationErrorKind::Custom {
                    code: "refinement".to_string(),
                },
                message,
            ),
            check: Arc::new(check),
        });
        self
    }

    /// `field` must equal `other` when both are present.
    pub fn must_match(mut self, field: impl Into<String>, other: impl Into<String>) -> Self {
        let field = field.into();
        let other = other.into();
        let (a, b) = (field.clone(), other.clone());
        self.refinements.push(Refinement {
            field,
            error: FieldError::new(ValidationErrorKind::Mismatch { other }),
            check: Arc::new(move |map| match (map.get(&a), map.get(&b)) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }),
        });
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, spec) in self.fields {
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateField(name));
            }
            let spec = spec.compile(&name)?;
            fields.push((name, spec));
        }

        if let Some(r) = self.refinements.iter().find(|r| !seen.contains(&r.field)) {
            return Err(SchemaError::UnknownRefinementField(r.field.clone()));
        }

        Ok(Schema {
            fields: Arc::new(fields),
            refinements: Arc::new(self.refinements),
            deny_unknown: self.deny_unknown,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
