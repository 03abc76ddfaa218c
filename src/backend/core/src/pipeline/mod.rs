//! Request pipeline.
//!
//! Every inbound request runs the same fixed sequence, each stage
//! short-circuiting on failure:
//!
//! 1. Rate limit on the client key (429)
//! 2. Structured validation against the route schema (400 `VALIDATION_ERROR`)
//! 3. Pattern detection and sanitisation of every string leaf (400 `SECURITY_ERROR`)
//! 4. CSRF verification for state-changing methods (403)
//!
//! A request that clears all four yields the sanitised payload. Every
//! rejection produces the JSON error body and, for the security stages,
//! exactly one security event.
//!
//! The pipeline is synchronous. No stage performs I/O and the rate-limit
//! increment never spans an await point.

mod walk;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BastionError, ErrorCode, ErrorResponse};
use crate::security::events::{EventContext, Redaction, SecurityEvent, SecurityEventLogger, SecurityEventType};
use crate::security::{
    CsrfManager, PatternDetector, RateLimitDecision, RateLimitKey, RateLimiter, Sanitizer, ThreatCategory,
};
use crate::validation::Schema;

use walk::{find_oversized, find_threat, sanitize, Guide, Threat};

/// Default cap on any single string leaf or key, in characters.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 10_000;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longer strings are rejected before any regex runs.
    pub max_string_length: usize,
    /// Detector categories to enforce.
    pub categories: Vec<ThreatCategory>,
    /// How offending input is written to security events.
    pub redaction: Redaction,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            categories: ThreatCategory::ALL.to_vec(),
            redaction: Redaction::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request and Route Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Framework-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub path: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub body: Value,
    /// Token from the CSRF header, if sent.
    pub csrf_token: Option<String>,
    /// Signed CSRF cookie value, if sent.
    pub csrf_cookie: Option<String>,
}

impl RawRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            path: path.into(),
            client_ip: "unknown".to_string(),
            user_agent: None,
            request_id: None,
            body,
            csrf_token: None,
            csrf_cookie: None,
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_csrf_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.csrf_cookie = Some(cookie.into());
        self
    }

    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    fn event_context(&self) -> EventContext {
        EventContext {
            ip: Some(self.client_ip.clone()),
            user_agent: self.user_agent.clone(),
            method: Some(self.method.to_string()),
            path: Some(self.path.clone()),
            request_id: self.request_id.clone(),
        }
    }
}

/// When a route requires a CSRF token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsrfMode {
    /// POST, PUT, PATCH and DELETE only.
    #[default]
    ByMethod,
    Always,
    Never,
}

/// Per-route settings applied by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Rate-limit class. `None` leaves the route unlimited.
    pub rate_limit: Option<String>,
    pub csrf: CsrfMode,
}

impl RoutePolicy {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            rate_limit: Some(class.into()),
            csrf: CsrfMode::ByMethod,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            rate_limit: None,
            csrf: CsrfMode::ByMethod,
        }
    }

    pub fn csrf(mut self, mode: CsrfMode) -> Self {
        self.csrf = mode;
        self
    }

    fn requires_csrf(&self, request: &RawRequest) -> bool {
        match self.csrf {
            CsrfMode::ByMethod => request.is_state_changing(),
            CsrfMode::Always => true,
            CsrfMode::Never => false,
        }
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::new(crate::security::rate_limit::DEFAULT_CLASS)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Result
// ═══════════════════════════════════════════════════════════════════════════════

/// A rejected request: status, error body and quota state for headers.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub body: ErrorResponse,
    /// Present on rate-limited routes.
    pub rate_limit: Option<RateLimitDecision>,
}

impl Rejection {
    pub fn code(&self) -> ErrorCode {
        self.body.code
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineResult<T = Value> {
    Ok {
        data: T,
        rate_limit: Option<RateLimitDecision>,
    },
    Rejected(Rejection),
}

impl<T> PipelineResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn rate_limit(&self) -> Option<RateLimitDecision> {
        match self {
            Self::Ok { rate_limit, .. } => *rate_limit,
            Self::Rejected(r) => r.rate_limit,
        }
    }

    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Self::Ok { data, .. } => Ok(data),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// Composes the limiter, validator, detector, sanitiser and CSRF manager.
///
/// Holds no mutable state of its own. The limiter is the only shared mutable
/// resource and is injected.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    limiter: Arc<RateLimiter>,
    csrf: Arc<CsrfManager>,
    events: Arc<SecurityEventLogger>,
    detector: PatternDetector,
    sanitizer: Sanitizer,
    config: PipelineConfig,
}

impl RequestPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        csrf: Arc<CsrfManager>,
        events: Arc<SecurityEventLogger>,
        config: PipelineConfig,
    ) -> Self {
        let detector = PatternDetector::with_categories(config.categories.iter().copied());
        Self {
            limiter,
            csrf,
            events,
            sanitizer: Sanitizer::with_detector(detector.clone()),
            detector,
            config,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn csrf(&self) -> &Arc<CsrfManager> {
        &self.csrf
    }

    pub fn events(&self) -> &Arc<SecurityEventLogger> {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Sanitise an outbound body (for example an upstream API response).
    pub fn sanitize_outbound(&self, body: Value) -> Value {
        self.sanitizer.sanitize_json(body)
    }

    /// Run all stages, returning the sanitised body on success.
    ///
    /// Without a schema the body is only scanned and sanitised.
    pub fn process(
        &self,
        raw: RawRequest,
        schema: Option<&Schema>,
        policy: &RoutePolicy,
    ) -> PipelineResult<Value> {
        match self.admit(&raw, policy) {
            Ok(rate_limit) => self.process_admitted(raw, schema, policy, rate_limit),
            Err(rejection) => PipelineResult::Rejected(rejection),
        }
    }

    /// Stage 1 on its own: charge the client's quota for the route.
    ///
    /// Only the client address, method and path of `raw` are read, so callers
    /// may admit a request before its body has been buffered.
    pub fn admit(
        &self,
        raw: &RawRequest,
        policy: &RoutePolicy,
    ) -> Result<Option<RateLimitDecision>, Rejection> {
        let Some(class) = policy.rate_limit.as_deref() else {
            return Ok(None);
        };
        let key = RateLimitKey::for_route(&raw.client_ip, class);
        let decision = self.limiter.check_class(class, &key);
        if !decision.allowed {
            self.events.log(
                SecurityEvent::new(SecurityEventType::RateLimitExceeded, &raw.event_context())
                    .with_detail(format!("{} limit {}", key, decision.limit)),
            );
            return Err(self.reject(
                "rate_limit",
                BastionError::from_code(ErrorCode::RateLimitExceeded),
                Some(decision),
                raw.request_id.as_deref(),
            ));
        }
        Ok(Some(decision))
    }

    /// Stages 2 to 4 for a request already admitted by [`Self::admit`].
    pub fn process_admitted(
        &self,
        raw: RawRequest,
        schema: Option<&Schema>,
        policy: &RoutePolicy,
        rate_limit: Option<RateLimitDecision>,
    ) -> PipelineResult<Value> {
        let context = raw.event_context();
        let request_id = raw.request_id.clone();
        let reject = |stage: &'static str, error: BastionError, rate_limit| {
            PipelineResult::Rejected(self.reject(stage, error, rate_limit, request_id.as_deref()))
        };

        let requires_csrf = policy.requires_csrf(&raw);
        let RawRequest {
            mut body,
            csrf_token,
            csrf_cookie,
            ..
        } = raw;
        let form_token = take_form_token(&mut body, &self.csrf.config().field_name);
        let submitted = csrf_token.or(form_token);

        // ── 2. Structured validation ────────────────────────────────────────
        if let Some(path) = find_oversized(&body, self.config.max_string_length, "") {
            self.events.log(
                SecurityEvent::new(SecurityEventType::SuspiciousInput, &context).with_detail(format!(
                    "input longer than {} characters at '{}'",
                    self.config.max_string_length, path
                )),
            );
            return reject(
                "length",
                BastionError::from_code(ErrorCode::SecurityError)
                    .with_internal_message("oversized input"),
                rate_limit,
            );
        }

        let cleaned = match schema.map(|s| s.validate(&body)) {
            None => body,
            Some(Ok(cleaned)) => cleaned,
            Some(Err(errors)) => {
                // Hostile payloads are never reflected back as field messages.
                if let Some(threat) = find_threat(&self.detector, &body, Guide::root(schema), "") {
                    self.record_threat(&threat, &context);
                    return reject("security", security_error(&threat), rate_limit);
                }
                return reject(
                    "validation",
                    BastionError::validation(errors.to_details()),
                    rate_limit,
                );
            }
        };

        // ── 3. Detection and sanitisation ───────────────────────────────────
        if let Some(threat) = find_threat(&self.detector, &cleaned, Guide::root(schema), "") {
            self.record_threat(&threat, &context);
            return reject("security", security_error(&threat), rate_limit);
        }
        let sanitized = sanitize(&self.sanitizer, cleaned, Guide::root(schema));

        // ── 4. CSRF ─────────────────────────────────────────────────────────
        if requires_csrf {
            let verdict = self.csrf.verify_cookie(
                submitted.as_deref(),
                csrf_cookie.as_deref(),
                Utc::now(),
                &context,
            );
            if !verdict.valid {
                let reason = verdict.reason.map_or("unknown", |r| r.as_str());
                return reject(
                    "csrf",
                    BastionError::from_code(ErrorCode::CsrfError).with_internal_message(reason),
                    rate_limit,
                );
            }
        }

        debug!(path = ?context.path, "Request passed pipeline");
        PipelineResult::Ok {
            data: sanitized,
            rate_limit,
        }
    }

    /// Run all stages and deserialize the sanitised body into `T`.
    ///
    /// A body that validated but does not fit `T` is a server-side defect and
    /// becomes a generic internal error.
    pub fn process_typed<T: DeserializeOwned>(
        &self,
        raw: RawRequest,
        schema: Option<&Schema>,
        policy: &RoutePolicy,
    ) -> PipelineResult<T> {
        let request_id = raw.request_id.clone();
        match self.process(raw, schema, policy) {
            PipelineResult::Ok { data, rate_limit } => match serde_json::from_value(data) {
                Ok(data) => PipelineResult::Ok { data, rate_limit },
                Err(e) => PipelineResult::Rejected(self.reject(
                    "internal",
                    BastionError::internal("sanitised body does not match target type").with_source(e),
                    rate_limit,
                    request_id.as_deref(),
                )),
            },
            PipelineResult::Rejected(rejection) => PipelineResult::Rejected(rejection),
        }
    }

    fn record_threat(&self, threat: &Threat, context: &EventContext) {
        let finding = &threat.finding;
        info!(
            category = finding.category.as_str(),
            signature = finding.signature,
            "Attack signature detected"
        );
        self.events.log(
            SecurityEvent::new(finding.category.event_type(), context)
                .with_input(threat.input.clone())
                .with_detail(format!("{} at '{}'", finding.signature, threat.path)),
        );
    }

    /// Build a rejection for `stage`, logging it and keeping the quota state.
    pub(crate) fn reject(
        &self,
        stage: &'static str,
        error: BastionError,
        rate_limit: Option<RateLimitDecision>,
        request_id: Option<&str>,
    ) -> Rejection {
        error.log();
        counter!("bastion_pipeline_rejections_total", "stage" => stage).increment(1);

        let mut body = error.to_response();
        if body.request_id.is_none() {
            if let Some(id) = request_id {
                body = body.with_request_id(id);
            }
        }
        Rejection {
            status: error.http_status(),
            body,
            rate_limit,
        }
    }
}

fn security_error(threat: &Threat) -> BastionError {
    BastionError::from_code(ErrorCode::SecurityError)
        .with_internal_message(format!("{} in '{}'", threat.finding.category, threat.path))
}

/// Remove the hidden form field carrying the CSRF token, returning its value.
fn take_form_token(body: &mut Value, field: &str) -> Option<String> {
    match body {
        Value::Object(map) => match map.remove(field) {
            Some(Value::String(token)) => Some(token),
            _ => None,
        },
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::events::MemorySink;
    use crate::security::rate_limit::{RateLimitConfig, RateLimitPolicy};
    use crate::security::CsrfConfig;
    use crate::validation::schemas;
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    struct Harness {
        pipeline: RequestPipeline,
        sink: MemorySink,
        cookie: String,
        token: String,
    }

    fn harness() -> Harness {
        let sink = MemorySink::new();
        let events = Arc::new(SecurityEventLogger::new(Redaction::default()).with_sink(sink.clone()));
        let csrf = Arc::new(CsrfManager::new(CsrfConfig::with_secret(SECRET), events.clone()).unwrap());
        let limiter = Arc::new(RateLimiter::with_policies(
            RateLimitConfig::default().with_class("tight", RateLimitPolicy::new(2, Duration::from_secs(60))),
        ));
        let token = csrf.issue(Duration::from_secs(3600));
        let cookie = csrf.seal(&token);
        Harness {
            pipeline: RequestPipeline::new(limiter, csrf, events, PipelineConfig::default()),
            sink,
            cookie,
            token: token.value,
        }
    }

    fn post(h: &Harness, body: Value) -> RawRequest {
        RawRequest::new(Method::POST, "/api/files", body)
            .with_client_ip("10.0.0.1")
            .with_csrf_token(h.token.clone())
            .with_csrf_cookie(h.cookie.clone())
    }

    #[test]
    fn test_clean_request_passes() {
        let h = harness();
        let result = h.pipeline.process(
            post(&h, json!({"fileId": "abc123DEF_-"})),
            Some(schemas::file_request()),
            &RoutePolicy::default(),
        );
        assert_eq!(result.into_result().unwrap(), json!({"fileId": "abc123DEF_-"}));
        assert!(h.sink.is_empty());
    }

    #[test]
    fn test_admit_charges_quota_once() {
        let h = harness();
        let policy = RoutePolicy::new("tight");
        let raw = post(&h, json!({"fileId": "abc"}));

        let decision = h.pipeline.admit(&raw, &policy).unwrap();
        assert_eq!(decision.map(|d| d.remaining), Some(1));
        let result = h.pipeline.process_admitted(raw, Some(schemas::file_request()), &policy, decision);
        assert_eq!(result.rate_limit().map(|d| d.remaining), Some(1));

        let raw = post(&h, json!({"fileId": "abc"}));
        assert!(h.pipeline.admit(&raw, &policy).is_ok());
        let rejection = h.pipeline.admit(&raw, &policy).unwrap_err();
        assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(h.sink.count_of(SecurityEventType::RateLimitExceeded), 1);
        assert!(h.pipeline.admit(&raw, &RoutePolicy::unlimited()).unwrap().is_none());
    }

    #[test]
    fn test_validation_errors_are_listed() {
        let h = harness();
        let result = h.pipeline.process(
            post(&h, json!({"email": "bad"})),
            Some(schemas::login()),
            &RoutePolicy::default(),
        );
        let rejection = result.into_result().unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert_eq!(rejection.code(), ErrorCode::ValidationError);
        assert_eq!(rejection.body.details.as_ref().map(Vec::len), Some(2));
        assert!(h.sink.is_empty());
    }

    #[test]
    fn test_hostile_invalid_payload_is_security_error() {
        let h = harness();
        let result = h.pipeline.process(
            post(&h, json!({"fileId": "<script>x</script>"})),
            Some(schemas::file_request()),
            &RoutePolicy::default(),
        );
        let rejection = result.into_result().unwrap_err();
        assert_eq!(rejection.code(), ErrorCode::SecurityError);
        assert!(rejection.body.details.is_none());
        assert_eq!(h.sink.len(), 1);
        assert_eq!(h.sink.count_of(SecurityEventType::XssAttempt), 1);
    }

    #[test]
    fn test_schemaless_body_is_scanned() {
        let h = harness();
        let result = h.pipeline.process(
            post(&h, json!({"q": "1' OR '1'='1"})),
            None,
            &RoutePolicy::default(),
        );
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::SecurityError);
        assert_eq!(h.sink.count_of(SecurityEventType::SqlInjection), 1);
    }

    #[test]
    fn test_oversized_input() {
        let h = harness();
        let result = h.pipeline.process(
            post(&h, json!({"q": "a".repeat(DEFAULT_MAX_STRING_LENGTH + 1)})),
            None,
            &RoutePolicy::default(),
        );
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::SecurityError);
        assert_eq!(h.sink.count_of(SecurityEventType::SuspiciousInput), 1);
    }

    #[test]
    fn test_rate_limit_rejects_with_headers_state() {
        let h = harness();
        let policy = RoutePolicy::new("tight").csrf(CsrfMode::Never);
        for _ in 0..2 {
            let result = h.pipeline.process(post(&h, json!({})), None, &policy);
            assert!(result.is_ok());
        }
        let result = h.pipeline.process(post(&h, json!({})), None, &policy);
        let rejection = result.into_result().unwrap_err();
        assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejection.rate_limit.map(|d| d.remaining), Some(0));
        assert_eq!(h.sink.count_of(SecurityEventType::RateLimitExceeded), 1);
    }

    #[test]
    fn test_csrf_form_field_is_accepted_and_removed() {
        let h = harness();
        let raw = RawRequest::new(
            Method::POST,
            "/api/files",
            json!({"fileId": "abc", "_csrf": h.token.clone()}),
        )
        .with_csrf_cookie(h.cookie.clone());
        let data = h
            .pipeline
            .process(raw, Some(schemas::file_request()), &RoutePolicy::default())
            .into_result()
            .unwrap();
        assert_eq!(data, json!({"fileId": "abc"}));
    }

    #[test]
    fn test_csrf_missing_on_post() {
        let h = harness();
        let raw = RawRequest::new(Method::POST, "/api/files", json!({"fileId": "abc"}));
        let rejection = h
            .pipeline
            .process(raw, Some(schemas::file_request()), &RoutePolicy::default())
            .into_result()
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);
        assert_eq!(rejection.body.error, ErrorCode::CsrfError.default_message());
        assert_eq!(h.sink.events()[0].detail.as_deref(), Some("missing"));
    }

    #[test]
    fn test_get_skips_csrf() {
        let h = harness();
        let raw = RawRequest::new(Method::GET, "/api/files", json!({"fileId": "abc"}));
        assert!(h
            .pipeline
            .process(raw, Some(schemas::file_request()), &RoutePolicy::default())
            .is_ok());
    }

    #[test]
    fn test_verbatim_fields_are_not_escaped() {
        let h = harness();
        let body = json!({"email": "a@example.com", "password": "p&ss'word/1"});
        let data = h
            .pipeline
            .process(post(&h, body), Some(schemas::login()), &RoutePolicy::default())
            .into_result()
            .unwrap();
        assert_eq!(data["password"], "p&ss'word/1");
    }

    #[test]
    fn test_process_typed_mismatch_is_internal() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Wrong {
            missing: u32,
        }

        let h = harness();
        let result: PipelineResult<Wrong> = h.pipeline.process_typed(
            post(&h, json!({"fileId": "abc"})).with_request_id("req-1"),
            Some(schemas::file_request()),
            &RoutePolicy::default(),
        );
        let rejection = result.into_result().unwrap_err();
        assert_eq!(rejection.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rejection.body.request_id.is_some());
        assert_ne!(rejection.body.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_outbound_sanitisation() {
        let h = harness();
        let out = h
            .pipeline
            .sanitize_outbound(json!({"name": "<script>x</script>Doc", "nodes": [{"title": "a<b"}]}));
        assert_eq!(out, json!({"name": "Doc", "nodes": [{"title": "a&lt;b"}]}));
    }
}
