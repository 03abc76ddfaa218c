//! Anti-forgery tokens.
//!
//! A token is 32 random bytes, hex encoded. The manager never stores tokens
//! itself: the hosting layer keeps a signed copy (`token.expiry.mac`) through a
//! [`CookieStore`] and the client echoes the raw token back in a header or a
//! form field. Verification compares the two in constant time and checks
//! expiry independently of equality.

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use super::events::{EventContext, SecurityEvent, SecurityEventLogger, SecurityEventType};
use crate::crypto::{self, constant_time_eq, mask_secret};
use crate::error::{BastionError, Result};

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Characters of a submitted token kept in security events.
pub const LOGGED_TOKEN_PREFIX: usize = 8;

static TOKEN_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("Invalid CSRF token regex"));

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Deserialize)]
pub struct CsrfConfig {
    /// HMAC key for the stored cookie copy. Required, at least 32 bytes.
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_header_name")]
    pub header_name: String,

    #[serde(default = "default_field_name")]
    pub field_name: String,

    #[serde(default = "default_secure_cookie")]
    pub secure_cookie: bool,
}

impl fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("secret", &"[REDACTED]")
            .field("token_ttl", &self.token_ttl)
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .field("field_name", &self.field_name)
            .field("secure_cookie", &self.secure_cookie)
            .finish()
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl: default_token_ttl(),
            cookie_name: default_cookie_name(),
            header_name: default_header_name(),
            field_name: default_field_name(),
            secure_cookie: default_secure_cookie(),
        }
    }
}

impl CsrfConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }
}

fn default_token_ttl() -> Duration { Duration::from_secs(3600) }
fn default_cookie_name() -> String { "csrf_token".to_string() }
fn default_header_name() -> String { "x-csrf-token".to_string() }
fn default_field_name() -> String { "_csrf".to_string() }
fn default_secure_cookie() -> bool { true }

// ═══════════════════════════════════════════════════════════════════════════════
// Hosting-layer storage
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

/// Attributes for a stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: Option<Duration>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
            max_age: None,
        }
    }
}

/// Cookie/session storage provided by the hosting layer.
pub trait CookieStore {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str, options: &CookieOptions);
    fn delete(&mut self, name: &str);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Token and verdict
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken {
    /// 64 lowercase hex chars.
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfToken")
            .field("value", &mask_secret(&self.value, LOGGED_TOKEN_PREFIX))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why a verification failed. Never exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    Missing,
    Malformed,
    Expired,
    Mismatch,
}

impl CsrfFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for CsrfFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrfVerdict {
    pub valid: bool,
    pub reason: Option<CsrfFailure>,
}

impl CsrfVerdict {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn fail(reason: CsrfFailure) -> Self {
        Self { valid: false, reason: Some(reason) }
    }
}

/// Whether `token` has the issued shape.
pub fn is_well_formed(token: &str) -> bool {
    TOKEN_FORMAT.is_match(token)
}

/// Verify a submitted token against the stored copy.
///
/// Precedence: missing, then malformed, then expired, then mismatch. The
/// constant-time comparison runs for every well-formed submission so timing
/// does not reveal whether a token expired or differed.
pub fn verify_token(
    submitted: Option<&str>,
    stored: Option<&str>,
    now: DateTime<Utc>,
    expiry: DateTime<Utc>,
) -> CsrfVerdict {
    let (Some(submitted), Some(stored)) = (submitted.filter(|s| !s.is_empty()), stored.filter(|s| !s.is_empty())) else {
        return CsrfVerdict::fail(CsrfFailure::Missing);
    };
    if !is_well_formed(submitted) {
        return CsrfVerdict::fail(CsrfFailure::Malformed);
    }

    let equal = constant_time_eq(submitted.as_bytes(), stored.as_bytes());

    if now > expiry {
        return CsrfVerdict::fail(CsrfFailure::Expired);
    }
    if !equal {
        return CsrfVerdict::fail(CsrfFailure::Mismatch);
    }
    CsrfVerdict::ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════════

enum StoredCookie {
    Absent,
    Tampered,
    Valid { token: String, expires_at: DateTime<Utc> },
}

/// Issues and verifies anti-forgery tokens. Holds no per-session state.
#[derive(Clone)]
pub struct CsrfManager {
    config: Arc<CsrfConfig>,
    events: Arc<SecurityEventLogger>,
}

impl fmt::Debug for CsrfManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfManager").field("config", &self.config).finish()
    }
}

impl CsrfManager {
    /// Fails when the signing secret is missing or shorter than 32 bytes.
    pub fn new(config: CsrfConfig, events: Arc<SecurityEventLogger>) -> Result<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(BastionError::configuration(format!(
                "csrf.secret must be at least {} bytes (got {})",
                MIN_SECRET_LEN,
                config.secret.len()
            )));
        }
        Ok(Self {
            config: Arc::new(config),
            events,
        })
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Issue
    // ───────────────────────────────────────────────────────────────────────────

    /// Fresh token expiring `ttl` from now.
    pub fn issue(&self, ttl: Duration) -> CsrfToken {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        CsrfToken {
            value: crypto::random_token(),
            expires_at: Utc::now() + ttl,
        }
    }

    /// Issue a token with the configured TTL and hand its signed copy to the
    /// store, replacing any previous token for the session.
    pub fn issue_into(&self, store: &mut dyn CookieStore) -> CsrfToken {
        let token = self.issue(self.config.token_ttl);
        let options = CookieOptions {
            secure: self.config.secure_cookie,
            max_age: Some(self.config.token_ttl),
            ..CookieOptions::default()
        };
        store.set(&self.config.cookie_name, &self.seal(&token), &options);
        debug!(expires_at = %token.expires_at, "CSRF token issued");
        token
    }

    /// Remove the stored copy.
    pub fn revoke(&self, store: &mut dyn CookieStore) {
        store.delete(&self.config.cookie_name);
    }

    /// Signed cookie form: `token.expiry_unix.hmac`.
    pub fn seal(&self, token: &CsrfToken) -> String {
        let payload = format!("{}.{}", token.value, token.expires_at.timestamp());
        let mac = crypto::hmac_sha256_hex(self.config.secret.as_bytes(), payload.as_bytes());
        format!("{}.{}", payload, mac)
    }

    fn open(&self, cookie: Option<&str>) -> StoredCookie {
        let Some(cookie) = cookie.filter(|c| !c.is_empty()) else {
            return StoredCookie::Absent;
        };
        let mut parts = cookie.rsplitn(2, '.');
        let (Some(mac), Some(payload)) = (parts.next(), parts.next()) else {
            return StoredCookie::Tampered;
        };
        if !crypto::verify_hmac_sha256(self.config.secret.as_bytes(), payload.as_bytes(), mac) {
            return StoredCookie::Tampered;
        }
        let Some((token, expiry)) = payload.split_once('.') else {
            return StoredCookie::Tampered;
        };
        let Some(expires_at) = expiry
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        else {
            return StoredCookie::Tampered;
        };
        StoredCookie::Valid {
            token: token.to_string(),
            expires_at,
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Verify
    // ───────────────────────────────────────────────────────────────────────────

    /// Verify against an explicit stored value and expiry. Failures are logged
    /// as `CSRF_ATTACK` events.
    pub fn verify(
        &self,
        submitted: Option<&str>,
        stored: Option<&str>,
        now: DateTime<Utc>,
        expiry: DateTime<Utc>,
        context: &EventContext,
    ) -> CsrfVerdict {
        let verdict = verify_token(submitted, stored, now, expiry);
        self.record(&verdict, submitted, context);
        verdict
    }

    /// Verify against the signed cookie value kept by the hosting layer.
    ///
    /// A cookie whose signature does not check out counts as a mismatch.
    pub fn verify_cookie(
        &self,
        submitted: Option<&str>,
        cookie: Option<&str>,
        now: DateTime<Utc>,
        context: &EventContext,
    ) -> CsrfVerdict {
        let verdict = match self.open(cookie) {
            StoredCookie::Absent => verify_token(submitted, None, now, now),
            StoredCookie::Valid { token, expires_at } => {
                verify_token(submitted, Some(&token), now, expires_at)
            }
            StoredCookie::Tampered => match verify_token(submitted, Some("-"), now, now) {
                v @ CsrfVerdict { reason: Some(CsrfFailure::Missing | CsrfFailure::Malformed), .. } => v,
                _ => CsrfVerdict::fail(CsrfFailure::Mismatch),
            },
        };
        self.record(&verdict, submitted, context);
        verdict
    }

    /// Verify using the store directly.
    pub fn verify_request(
        &self,
        submitted: Option<&str>,
        store: &dyn CookieStore,
        now: DateTime<Utc>,
        context: &EventContext,
    ) -> CsrfVerdict {
        let cookie = store.get(&self.config.cookie_name);
        self.verify_cookie(submitted, cookie.as_deref(), now, context)
    }

    fn record(&self, verdict: &CsrfVerdict, submitted: Option<&str>, context: &EventContext) {
        let Some(reason) = verdict.reason else {
            return;
        };
        counter!("bastion_csrf_failures_total", "reason" => reason.as_str()).increment(1);

        let mut event = SecurityEvent::new(SecurityEventType::CsrfAttack, context)
            .with_detail(reason.as_str());
        if let Some(token) = submitted.filter(|s| !s.is_empty()) {
            event = event.with_input(mask_secret(token, LOGGED_TOKEN_PREFIX));
        }
        self.events.log(event);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::events::{MemorySink, Redaction};
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[derive(Default)]
    struct MapStore {
        cookies: HashMap<String, (String, CookieOptions)>,
    }

    impl CookieStore for MapStore {
        fn get(&self, name: &str) -> Option<String> {
            self.cookies.get(name).map(|(v, _)| v.clone())
        }
        fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
            self.cookies.insert(name.to_string(), (value.to_string(), options.clone()));
        }
        fn delete(&mut self, name: &str) {
            self.cookies.remove(name);
        }
    }

    fn manager() -> (CsrfManager, MemorySink) {
        let sink = MemorySink::new();
        let logger = SecurityEventLogger::new(Redaction::default()).with_sink(sink.clone());
        let manager = CsrfManager::new(CsrfConfig::with_secret(SECRET), Arc::new(logger)).unwrap();
        (manager, sink)
    }

    fn token(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = CsrfManager::new(CsrfConfig::with_secret("short"), Arc::new(SecurityEventLogger::default()))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_issue_shape() {
        let (manager, _) = manager();
        let token = manager.issue(Duration::from_secs(60));
        assert!(is_well_formed(&token.value));
        assert!(token.expires_at > Utc::now());
        assert_ne!(token.value, manager.issue(Duration::from_secs(60)).value);
    }

    #[test]
    fn test_verify_precedence() {
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(5);
        let a = token('a');

        assert_eq!(verify_token(None, Some(&a), now, later).reason, Some(CsrfFailure::Missing));
        assert_eq!(verify_token(Some(""), Some(&a), now, later).reason, Some(CsrfFailure::Missing));
        assert_eq!(verify_token(Some(&a), None, now, later).reason, Some(CsrfFailure::Missing));
        assert_eq!(
            verify_token(Some("not-hex"), Some(&a), now, later).reason,
            Some(CsrfFailure::Malformed)
        );
        assert_eq!(
            verify_token(Some(&a.to_uppercase()), Some(&a), now, later).reason,
            Some(CsrfFailure::Malformed)
        );
        assert_eq!(
            verify_token(Some(&token('b')), Some(&a), now, later).reason,
            Some(CsrfFailure::Mismatch)
        );
        assert!(verify_token(Some(&a), Some(&a), now, later).valid);
    }

    #[test]
    fn test_expired_equal_token_reports_expired() {
        let now = Utc::now();
        let a = token('c');
        let verdict = verify_token(Some(&a), Some(&a), now, now - chrono::Duration::seconds(1));
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, Some(CsrfFailure::Expired));
    }

    #[test]
    fn test_failure_emits_truncated_event() {
        let (manager, sink) = manager();
        let now = Utc::now();
        let submitted = token('d');
        let verdict = manager.verify(
            Some(&submitted),
            Some(&token('e')),
            now,
            now + chrono::Duration::minutes(1),
            &EventContext::default(),
        );
        assert_eq!(verdict.reason, Some(CsrfFailure::Mismatch));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::CsrfAttack);
        assert_eq!(events[0].detail.as_deref(), Some("mismatch"));
        assert_eq!(events[0].input.as_deref(), Some("dddddddd..."));
    }

    #[test]
    fn test_success_emits_nothing() {
        let (manager, sink) = manager();
        let now = Utc::now();
        let a = token('f');
        let verdict = manager.verify(Some(&a), Some(&a), now, now + chrono::Duration::minutes(1), &EventContext::default());
        assert!(verdict.valid);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_cookie_round_trip() {
        let (manager, _) = manager();
        let mut store = MapStore::default();
        let issued = manager.issue_into(&mut store);

        let (_, options) = store.cookies.get("csrf_token").unwrap();
        assert!(options.http_only);
        assert_eq!(options.same_site, SameSite::Strict);

        let verdict = manager.verify_request(Some(&issued.value), &store, Utc::now(), &EventContext::default());
        assert!(verdict.valid);

        let verdict = manager.verify_request(Some(&token('0')), &store, Utc::now(), &EventContext::default());
        assert_eq!(verdict.reason, Some(CsrfFailure::Mismatch));
    }

    #[test]
    fn test_reissue_replaces_previous_token() {
        let (manager, _) = manager();
        let mut store = MapStore::default();
        let first = manager.issue_into(&mut store);
        let second = manager.issue_into(&mut store);

        let ctx = EventContext::default();
        assert_eq!(
            manager.verify_request(Some(&first.value), &store, Utc::now(), &ctx).reason,
            Some(CsrfFailure::Mismatch)
        );
        assert!(manager.verify_request(Some(&second.value), &store, Utc::now(), &ctx).valid);
    }

    #[test]
    fn test_cookie_expiry_enforced() {
        let (manager, _) = manager();
        let mut store = MapStore::default();
        let issued = manager.issue_into(&mut store);
        let later = issued.expires_at + chrono::Duration::seconds(5);
        let verdict = manager.verify_request(Some(&issued.value), &store, later, &EventContext::default());
        assert_eq!(verdict.reason, Some(CsrfFailure::Expired));
    }

    #[test]
    fn test_tampered_cookie_is_mismatch() {
        let (manager, _) = manager();
        let issued = manager.issue(Duration::from_secs(60));
        let sealed = manager.seal(&issued);

        // Extend the expiry without re-signing.
        let forged = sealed.replacen(
            &issued.expires_at.timestamp().to_string(),
            &(issued.expires_at.timestamp() + 86_400).to_string(),
            1,
        );
        let verdict = manager.verify_cookie(Some(&issued.value), Some(&forged), Utc::now(), &EventContext::default());
        assert_eq!(verdict.reason, Some(CsrfFailure::Mismatch));

        let verdict = manager.verify_cookie(Some("zz"), Some(&forged), Utc::now(), &EventContext::default());
        assert_eq!(verdict.reason, Some(CsrfFailure::Malformed));
    }

    #[test]
    fn test_revoke_removes_cookie() {
        let (manager, _) = manager();
        let mut store = MapStore::default();
        let issued = manager.issue_into(&mut store);
        manager.revoke(&mut store);
        let verdict = manager.verify_request(Some(&issued.value), &store, Utc::now(), &EventContext::default());
        assert_eq!(verdict.reason, Some(CsrfFailure::Missing));
    }

    #[test]
    fn test_token_debug_is_masked() {
        let (manager, _) = manager();
        let issued = manager.issue(Duration::from_secs(60));
        let debug = format!("{:?}", issued);
        assert!(!debug.contains(&issued.value));
    }
}
