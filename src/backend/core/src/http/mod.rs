//! Axum integration.
//!
//! - [`SecurityLayer`]: runs the request pipeline in front of configured routes
//! - [`HeaderCookieJar`]: cookie storage over request and response headers
//! - [`Rejection`] responses with the JSON error body and quota headers

mod layer;

pub use layer::{SanitizedPayload, SecurityLayer, SecurityService, DEFAULT_MAX_BODY_BYTES};

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::warn;

use crate::pipeline::Rejection;
use crate::security::csrf::SameSite;
use crate::security::{CookieOptions, CookieStore, CsrfManager, RateLimitDecision};

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
pub const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers consulted for the client address, in order.
pub const DEFAULT_TRUSTED_PROXY_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

// ═══════════════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════════════

/// Write `X-Rate-Limit-*` headers. The reset is in unix seconds.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATE_LIMIT_RESET, HeaderValue::from(decision.reset_unix()));
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(&self.body)).into_response();
        if let Some(decision) = &self.rate_limit {
            apply_rate_limit_headers(response.headers_mut(), decision);
            if self.status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = decision.retry_after_secs(chrono::Utc::now());
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            }
        }
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client Address
// ═══════════════════════════════════════════════════════════════════════════════

/// Client address from trusted proxy headers, then the socket peer.
///
/// `X-Forwarded-For` can list several hops. The first is the client.
pub fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    trusted_headers: &[String],
) -> String {
    for name in trusted_headers {
        let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let candidate = value.split(',').next().unwrap_or(value).trim();
        if let Ok(ip) = candidate.parse::<std::net::IpAddr>() {
            return ip.to_string();
        }
    }
    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cookies
// ═══════════════════════════════════════════════════════════════════════════════

/// [`CookieStore`] over the request `Cookie` headers.
///
/// Writes are collected as `Set-Cookie` values for the response.
#[derive(Debug, Clone, Default)]
pub struct HeaderCookieJar {
    cookies: HashMap<String, String>,
    outgoing: Vec<String>,
}

impl HeaderCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut jar = Self::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                if let Some((name, v)) = pair.trim().split_once('=') {
                    jar.cookies.insert(name.trim().to_string(), v.trim().to_string());
                }
            }
        }
        jar
    }

    /// `Set-Cookie` values written so far.
    pub fn set_cookie_values(&self) -> &[String] {
        &self.outgoing
    }

    /// Append the collected `Set-Cookie` headers to a response.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        for cookie in &self.outgoing {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(e) => warn!(error = %e, "Dropping unencodable Set-Cookie value"),
            }
        }
    }
}

impl CookieStore for HeaderCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.cookies.insert(name.to_string(), value.to_string());
        self.outgoing.push(format_cookie(name, value, options));
    }

    fn delete(&mut self, name: &str) {
        self.cookies.remove(name);
        let options = CookieOptions {
            max_age: Some(std::time::Duration::ZERO),
            ..CookieOptions::default()
        };
        self.outgoing.push(format_cookie(name, "", &options));
    }
}

fn format_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut cookie = format!("{}={}; Path={}", name, value, options.path);
    if let Some(max_age) = options.max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie.push_str(match options.same_site {
        SameSite::Strict => "; SameSite=Strict",
        SameSite::Lax => "; SameSite=Lax",
    });
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Issue a CSRF token into the jar and return the raw value for the client.
pub fn issue_csrf_token(csrf: &CsrfManager, jar: &mut HeaderCookieJar) -> String {
    csrf.issue_into(jar).value
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
