//! Signature-based injection detection.
//!
//! The signature set is static: an ordered list of case-insensitive regexes per
//! [`ThreatCategory`]. Matching is pure and allocation-free until a signature
//! fires. Callers are expected to length-check input before scanning (see
//! [`crate::pipeline`]), regexes here are linear-time but not free.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use super::events::SecurityEventType;
use super::{json_kind, InputError};

/// Event-handler attribute names matched by both the detector and the sanitizer.
///
/// Kept as an explicit list so that ordinary words starting with `on` (`one=1`,
/// `online=true`) are not mistaken for handlers.
pub(crate) const EVENT_HANDLERS: &str = "abort|afterprint|animation(?:start|end|iteration)|\
auxclick|beforeinput|beforeprint|beforeunload|blur|canplay|canplaythrough|change|click|close|\
contextmenu|copy|cut|dblclick|drag|dragend|dragenter|dragleave|dragover|dragstart|drop|\
durationchange|ended|error|focus|focusin|focusout|formdata|hashchange|input|invalid|keydown|\
keypress|keyup|load|loadeddata|loadedmetadata|loadstart|message|mousedown|mouseenter|\
mouseleave|mousemove|mouseout|mouseover|mouseup|mousewheel|offline|online|pagehide|pageshow|\
paste|pause|play|playing|pointer(?:down|up|move|over|out|enter|leave|cancel)|popstate|\
progress|ratechange|reset|resize|scroll|search|seeked|seeking|select|selectstart|show|\
stalled|storage|submit|suspend|timeupdate|toggle|touch(?:start|end|move|cancel)|\
transition(?:start|end|run|cancel)|unload|volumechange|waiting|wheel";

// ═══════════════════════════════════════════════════════════════════════════════
// Categories
// ═══════════════════════════════════════════════════════════════════════════════

/// Class of attack a signature belongs to.
///
/// Declaration order is reporting priority: when a value trips several
/// categories, the first one here is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    Xss,
    SqlInjection,
    PathTraversal,
    CommandInjection,
    LdapInjection,
}

impl ThreatCategory {
    pub const ALL: [ThreatCategory; 5] = [
        Self::Xss,
        Self::SqlInjection,
        Self::PathTraversal,
        Self::CommandInjection,
        Self::LdapInjection,
    ];

    /// Stable machine name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xss => "xss",
            Self::SqlInjection => "sql_injection",
            Self::PathTraversal => "path_traversal",
            Self::CommandInjection => "command_injection",
            Self::LdapInjection => "ldap_injection",
        }
    }

    /// Security event raised when a value in this category is rejected.
    pub fn event_type(&self) -> SecurityEventType {
        match self {
            Self::Xss => SecurityEventType::XssAttempt,
            Self::SqlInjection => SecurityEventType::SqlInjection,
            Self::PathTraversal => SecurityEventType::PathTraversal,
            Self::CommandInjection => SecurityEventType::CommandInjection,
            Self::LdapInjection => SecurityEventType::LdapInjection,
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xss => write!(f, "XSS"),
            Self::SqlInjection => write!(f, "SQL Injection"),
            Self::PathTraversal => write!(f, "Path Traversal"),
            Self::CommandInjection => write!(f, "Command Injection"),
            Self::LdapInjection => write!(f, "LDAP Injection"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Signatures
// ═══════════════════════════════════════════════════════════════════════════════

struct Signature {
    category: ThreatCategory,
    name: &'static str,
    regex: Regex,
}

fn signature(category: ThreatCategory, name: &'static str, pattern: &str) -> Signature {
    Signature {
        category,
        name,
        regex: Regex::new(pattern).expect("built-in signature must compile"),
    }
}

static SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    use ThreatCategory::*;
    vec![
        // XSS
        signature(Xss, "script_tag", r"(?i)<\s*/?\s*script\b"),
        signature(Xss, "script_protocol", r"(?i)\b(?:java|vb)script\s*:"),
        signature(Xss, "event_handler", &format!(r"(?i)\bon(?:{})\s*=", EVENT_HANDLERS)),
        signature(Xss, "embedding_tag", r"(?i)<\s*(?:iframe|frame|object|embed|applet|svg|meta|base)\b"),
        signature(Xss, "html_data_uri", r"(?i)\bdata\s*:\s*text/html"),
        // SQL injection
        signature(SqlInjection, "union_select", r"(?i)\bunion\b(?:\s+all)?\s+select\b"),
        signature(SqlInjection, "stacked_query", r"(?i);\s*(?:drop|delete|insert|update|truncate|alter|create|exec(?:ute)?)\b"),
        signature(SqlInjection, "drop_object", r"(?i)\bdrop\s+(?:table|database|schema)\b"),
        signature(SqlInjection, "quoted_tautology", r"(?i)'\s*(?:or|and)\s+'?\w+'?\s*=\s*'?\w+"),
        signature(SqlInjection, "numeric_tautology", r"(?i)\b(?:or|and)\s+\d+\s*=\s*\d+"),
        signature(SqlInjection, "trailing_comment", r"(?:'|;)\s*(?:--|#)"),
        signature(SqlInjection, "block_comment", r"/\*[\s\S]*?\*/"),
        signature(SqlInjection, "time_delay", r"(?i)\b(?:sleep|pg_sleep|benchmark)\s*\(|\bwaitfor\s+delay\b"),
        // Path traversal
        signature(PathTraversal, "dot_dot_slash", r"\.\.[/\\]"),
        signature(PathTraversal, "encoded_dot_dot", r"(?i)(?:%2e|%252e)(?:%2e|%252e|\.)|\.(?:%2e|%252e)|\.\.(?:%2f|%5c|%252f)"),
        signature(PathTraversal, "null_byte", r"(?i)%00|\x00"),
        signature(PathTraversal, "system_file", r"(?i)/etc/(?:passwd|shadow|hosts)\b|\bc:\\windows\\"),
        // Command injection
        signature(
            CommandInjection,
            "chained_command",
            r"(?i)(?:[;&|`]|\|\||&&)\s*(?:cat|ls|rm|mv|cp|wget|curl|nc|ncat|bash|sh|zsh|python[23]?|perl|ruby|php|chmod|chown|whoami|id|uname|ping|nslookup|powershell|cmd(?:\.exe)?|echo|kill|sudo)\b",
        ),
        signature(CommandInjection, "command_substitution", r"\$\([^)]*\)"),
        signature(CommandInjection, "backtick_substitution", r"`[^`]+`"),
        signature(CommandInjection, "variable_expansion", r"\$\{[^}]*\}"),
        // LDAP injection
        signature(LdapInjection, "filter_break", r"\*\s*\)\s*\("),
        signature(LdapInjection, "filter_operator", r"\(\s*[|&!]\s*\("),
        signature(LdapInjection, "attribute_wildcard", r"(?i)\)\s*\(\s*[a-z][\w-]*\s*=\s*\*"),
        signature(LdapInjection, "objectclass_wildcard", r"(?i)\(\s*objectclass\s*=\s*\*\s*\)"),
    ]
});

// ═══════════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════════

/// One matched signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub category: ThreatCategory,
    /// Short signature name, safe to log.
    pub signature: &'static str,
    /// Regex source of the signature.
    pub pattern: &'static str,
}

/// Verdict for a single category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub detected: bool,
    pub matched_patterns: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Detector
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless signature matcher over a set of enabled categories.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    categories: Vec<ThreatCategory>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternDetector {
    /// Detector with every category enabled.
    pub fn new() -> Self {
        Self {
            categories: ThreatCategory::ALL.to_vec(),
        }
    }

    /// Detector restricted to the given categories.
    pub fn with_categories(categories: impl IntoIterator<Item = ThreatCategory>) -> Self {
        let mut categories: Vec<_> = categories.into_iter().collect();
        categories.sort();
        categories.dedup();
        Self { categories }
    }

    pub fn categories(&self) -> &[ThreatCategory] {
        &self.categories
    }

    /// Check `input` against every signature of one category.
    ///
    /// All matching signature sources are returned for diagnostics.
    pub fn detect(&self, category: ThreatCategory, input: &str) -> Detection {
        let matched_patterns: Vec<String> = SIGNATURES
            .iter()
            .filter(|s| s.category == category && s.regex.is_match(input))
            .map(|s| s.regex.as_str().to_string())
            .collect();
        Detection {
            detected: !matched_patterns.is_empty(),
            matched_patterns,
        }
    }

    /// Every finding across the enabled categories, in priority order.
    pub fn scan(&self, input: &str) -> Vec<Finding> {
        if input.is_empty() {
            return Vec::new();
        }
        SIGNATURES
            .iter()
            .filter(|s| self.categories.contains(&s.category) && s.regex.is_match(input))
            .map(|s| Finding {
                category: s.category,
                signature: s.name,
                pattern: s.regex.as_str(),
            })
            .collect()
    }

    /// Highest-priority finding, stopping at the first match.
    pub fn first_threat(&self, input: &str) -> Option<Finding> {
        if input.is_empty() {
            return None;
        }
        SIGNATURES
            .iter()
            .find(|s| self.categories.contains(&s.category) && s.regex.is_match(input))
            .map(|s| Finding {
                category: s.category,
                signature: s.name,
                pattern: s.regex.as_str(),
            })
    }

    pub fn is_threat(&self, input: &str) -> bool {
        self.first_threat(input).is_some()
    }

    /// Scan a dynamic value. Only strings can be inspected.
    pub fn detect_value(&self, value: &Value) -> Result<Vec<Finding>, InputError> {
        match value {
            Value::String(s) => Ok(self.scan(s)),
            other => Err(InputError::NotAString(json_kind(other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
