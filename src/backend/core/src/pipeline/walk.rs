//! Schema-guided walks over JSON trees.
//!
//! The schema only decides which string leaves are verbatim (neither scanned
//! nor escaped) or unescaped (scanned, then kept as validated). Keys and values
//! outside the schema are always treated as untrusted text.

use serde_json::{Map, Value};

use crate::security::{Finding, PatternDetector, Sanitizer};
use crate::validation::{FieldSpec, Schema};

/// Where a value sits relative to the route schema.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Guide<'a> {
    Free,
    Field(&'a FieldSpec),
    Object(&'a Schema),
}

impl<'a> Guide<'a> {
    pub(crate) fn root(schema: Option<&'a Schema>) -> Self {
        schema.map_or(Guide::Free, Guide::Object)
    }

    fn is_verbatim(&self) -> bool {
        matches!(self, Guide::Field(spec) if spec.is_verbatim())
    }

    fn is_unescaped(&self) -> bool {
        matches!(self, Guide::Field(spec) if spec.is_unescaped())
    }

    fn key(&self, key: &str) -> Guide<'a> {
        let schema = match *self {
            Guide::Object(schema) => Some(schema),
            Guide::Field(spec) => spec.schema(),
            Guide::Free => None,
        };
        schema
            .and_then(|s| s.field(key))
            .map_or(Guide::Free, Guide::Field)
    }

    fn item(&self) -> Guide<'a> {
        match *self {
            Guide::Field(spec) => spec.item().map_or(Guide::Free, Guide::Field),
            _ => Guide::Free,
        }
    }
}

fn child(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Length Guard
// ═══════════════════════════════════════════════════════════════════════════════

/// Path of the first string leaf or key longer than `max` characters.
pub(crate) fn find_oversized(value: &Value, max: usize, path: &str) -> Option<String> {
    let too_long = |s: &str| s.len() > max && s.chars().count() > max;
    match value {
        Value::String(s) if too_long(s.as_str()) => Some(path.to_string()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_oversized(v, max, &format!("{}[{}]", path, i))),
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            let p = child(path, k);
            if too_long(k.as_str()) {
                Some(p)
            } else {
                find_oversized(v, max, &p)
            }
        }),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Threat Scan
// ═══════════════════════════════════════════════════════════════════════════════

/// First attack signature found in a tree.
#[derive(Debug, Clone)]
pub(crate) struct Threat {
    pub path: String,
    pub input: String,
    pub finding: Finding,
}

/// Scan every non-verbatim string leaf and every key, depth first.
pub(crate) fn find_threat(
    detector: &PatternDetector,
    value: &Value,
    guide: Guide<'_>,
    path: &str,
) -> Option<Threat> {
    match value {
        Value::String(s) if !guide.is_verbatim() => detector.first_threat(s).map(|finding| Threat {
            path: path.to_string(),
            input: s.clone(),
            finding,
        }),
        Value::Array(items) => {
            let item = guide.item();
            items
                .iter()
                .enumerate()
                .find_map(|(i, v)| find_threat(detector, v, item, &format!("{}[{}]", path, i)))
        }
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            let p = child(path, k);
            if let Some(finding) = detector.first_threat(k) {
                return Some(Threat {
                    path: p,
                    input: k.clone(),
                    finding,
                });
            }
            find_threat(detector, v, guide.key(k), &p)
        }),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sanitisation
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter every escaped string leaf and every key.
pub(crate) fn sanitize(sanitizer: &Sanitizer, value: Value, guide: Guide<'_>) -> Value {
    match value {
        Value::String(s) if guide.is_unescaped() => Value::String(s),
        Value::String(s) => Value::String(sanitizer.filter(&s)),
        Value::Array(items) => {
            let item = guide.item();
            Value::Array(items.into_iter().map(|v| sanitize(sanitizer, v, item)).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let inner = guide.key(&k);
                out.insert(sanitizer.filter(&k), sanitize(sanitizer, v, inner));
            }
            Value::Object(out)
        }
        other => other,
    }
}
