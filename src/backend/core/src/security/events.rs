//! Security event logging.
//!
//! Events are write-once records of rejected input, CSRF failures and quota
//! violations. The logger redacts the offending input, then fans the event out
//! to its sinks. Emission is best-effort: a sink that cannot accept an event
//! drops it, and nothing here ever fails the request that triggered it.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::crypto::sha256_hex;

/// Default excerpt length for logged input.
pub const DEFAULT_INPUT_EXCERPT: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// Event Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    XssAttempt,
    SqlInjection,
    PathTraversal,
    CommandInjection,
    LdapInjection,
    CsrfAttack,
    RateLimitExceeded,
    SuspiciousInput,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XssAttempt => "XSS_ATTEMPT",
            Self::SqlInjection => "SQL_INJECTION",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::CommandInjection => "COMMAND_INJECTION",
            Self::LdapInjection => "LDAP_INJECTION",
            Self::CsrfAttack => "CSRF_ATTACK",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::SuspiciousInput => "SUSPICIOUS_INPUT",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redaction
// ═══════════════════════════════════════════════════════════════════════════════

/// How offending input is written to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redaction {
    /// Keep the first `n` characters.
    Truncate(usize),
    /// Replace with a SHA-256 prefix, enough to correlate repeats.
    Hash,
    /// Drop the input entirely.
    Omit,
}

impl Default for Redaction {
    fn default() -> Self {
        Self::Truncate(DEFAULT_INPUT_EXCERPT)
    }
}

impl Redaction {
    /// Apply the policy. Control characters are always stripped first so a
    /// logged value can never forge a log line.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let clean = strip_control(raw);
        match self {
            Self::Truncate(n) => {
                let count = clean.chars().count();
                if count <= *n {
                    Some(clean)
                } else {
                    let mut out: String = clean.chars().take(*n).collect();
                    out.push_str("...");
                    Some(out)
                }
            }
            Self::Hash => Some(format!("sha256:{}", &sha256_hex(raw.as_bytes())[..16])),
            Self::Omit => None,
        }
    }
}

/// Remove control characters (CR and LF included).
pub fn strip_control(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event
// ═══════════════════════════════════════════════════════════════════════════════

/// Request-side context attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub request_id: Option<String>,
}

/// A recorded security event. Never mutated once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Redacted copy of the offending input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Internal-only detail (signature name, failure reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, context: &EventContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            ip: context.ip.clone(),
            user_agent: context.user_agent.as_deref().map(strip_control),
            path: context.path.clone(),
            request_id: context.request_id.clone(),
            input: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the raw offending input. The logger redacts it before storage.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(strip_control(&detail.into()));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sinks
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination for security events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &SecurityEvent);
}

/// Writes events through `tracing` under the `security` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write(&self, event: &SecurityEvent) {
        tracing::warn!(
            target: "security",
            event_id = %event.id,
            event_type = %event.event_type,
            ip = event.ip.as_deref().unwrap_or("-"),
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            path = event.path.as_deref().unwrap_or("-"),
            request_id = event.request_id.as_deref().unwrap_or("-"),
            input = event.input.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or("-"),
            "Security event"
        );
    }
}

/// Keeps events in memory. Intended for tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count_of(&self, event_type: SecurityEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn write(&self, event: &SecurityEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events to an async consumer over a bounded channel.
///
/// A full or closed channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<SecurityEvent>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn write(&self, event: &SecurityEvent) {
        if let Err(e) = self.sender.try_send(event.clone()) {
            counter!("bastion_security_events_dropped_total").increment(1);
            tracing::debug!(error = %e, "Security event dropped");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Logger
// ═══════════════════════════════════════════════════════════════════════════════

/// Redacts and dispatches security events.
#[derive(Clone)]
pub struct SecurityEventLogger {
    redaction: Redaction,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl fmt::Debug for SecurityEventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityEventLogger")
            .field("redaction", &self.redaction)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Default for SecurityEventLogger {
    fn default() -> Self {
        Self::new(Redaction::default()).with_sink(TracingSink)
    }
}

impl SecurityEventLogger {
    /// Logger with no sinks.
    pub fn new(redaction: Redaction) -> Self {
        Self {
            redaction,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn redaction(&self) -> Redaction {
        self.redaction
    }

    /// Redact and record an event, returning the stored form.
    pub fn log(&self, mut event: SecurityEvent) -> SecurityEvent {
        event.input = event.input.as_deref().and_then(|raw| self.redaction.apply(raw));

        counter!(
            "bastion_security_events_total",
            "type" => event.event_type.as_str()
        )
        .increment(1);

        for sink in &self.sinks {
            sink.write(&event);
        }
        event
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EventContext {
        EventContext {
            ip: Some("203.0.113.7".into()),
            user_agent: Some("curl/8.0\r\nX-Forged: yes".into()),
            method: Some("POST".into()),
            path: Some("/api/contact".into()),
            request_id: None,
        }
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&SecurityEventType::XssAttempt).unwrap();
        assert_eq!(json, "\"XSS_ATTEMPT\"");
        let json = serde_json::to_string(&SecurityEventType::CsrfAttack).unwrap();
        assert_eq!(json, "\"CSRF_ATTACK\"");
    }

    #[test]
    fn test_truncate_redaction() {
        let redaction = Redaction::Truncate(5);
        assert_eq!(redaction.apply("abcdefgh").as_deref(), Some("abcde..."));
        assert_eq!(redaction.apply("abc").as_deref(), Some("abc"));
    }

    #[test]
    fn test_control_characters_stripped() {
        let redaction = Redaction::Truncate(100);
        assert_eq!(
            redaction.apply("line\r\nINFO forged").as_deref(),
            Some("lineINFO forged")
        );
    }

    #[test]
    fn test_hash_redaction() {
        let a = Redaction::Hash.apply("<script>").unwrap();
        let b = Redaction::Hash.apply("<script>").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert!(!a.contains("script"));
    }

    #[test]
    fn test_omit_redaction() {
        assert_eq!(Redaction::Omit.apply("secret"), None);
    }

    #[test]
    fn test_logger_redacts_before_sinks() {
        let sink = MemorySink::new();
        let logger = SecurityEventLogger::new(Redaction::Truncate(8)).with_sink(sink.clone());

        let long = "<script>".repeat(20);
        logger.log(SecurityEvent::new(SecurityEventType::XssAttempt, &context()).with_input(long));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].input.as_deref(), Some("<script>..."));
        assert_eq!(events[0].user_agent.as_deref(), Some("curl/8.0X-Forged: yes"));
        assert_eq!(sink.count_of(SecurityEventType::XssAttempt), 1);
    }

    #[test]
    fn test_event_serializes_with_type_key() {
        let event = SecurityEvent::new(SecurityEventType::RateLimitExceeded, &EventContext::default());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RATE_LIMIT_EXCEEDED");
        assert!(json.get("ip").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        let logger = SecurityEventLogger::new(Redaction::Omit).with_sink(sink);

        logger.log(SecurityEvent::new(SecurityEventType::CsrfAttack, &context()).with_input("abc"));
        logger.log(SecurityEvent::new(SecurityEventType::CsrfAttack, &context()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, SecurityEventType::CsrfAttack);
        assert!(received.input.is_none());
        assert!(rx.try_recv().is_err());
    }
}
