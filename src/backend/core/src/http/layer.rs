//! Tower layer running the request pipeline in front of axum handlers.
//!
//! Only routes registered on the layer are inspected. For those, the client's
//! quota is charged first, then the JSON body is buffered, run through the
//! remaining stages and replaced with its sanitised form before the handler
//! sees it. A body that is too large or not JSON is a `VALIDATION_ERROR` on
//! field `body`. Every response on a rate-limited route carries
//! the `X-Rate-Limit-*` headers. Unregistered routes pass through untouched.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::{BastionError, ErrorDetail};
use crate::http::{apply_rate_limit_headers, extract_client_ip, HeaderCookieJar, DEFAULT_TRUSTED_PROXY_HEADERS, X_REQUEST_ID};
use crate::pipeline::{PipelineResult, RawRequest, RequestPipeline, RoutePolicy};
use crate::security::CookieStore;
use crate::validation::Schema;

/// Default cap on buffered request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// The sanitised body, also inserted as a request extension.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedPayload(pub Value);

#[derive(Debug, Clone)]
struct SecuredRoute {
    method: Method,
    path: String,
    schema: Option<Schema>,
    policy: RoutePolicy,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SecurityLayer {
    pipeline: Arc<RequestPipeline>,
    routes: Arc<Vec<SecuredRoute>>,
    max_body_bytes: usize,
    trusted_proxy_headers: Arc<Vec<String>>,
}

impl SecurityLayer {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            routes: Arc::new(Vec::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            trusted_proxy_headers: Arc::new(
                DEFAULT_TRUSTED_PROXY_HEADERS.iter().map(|h| h.to_string()).collect(),
            ),
        }
    }

    /// Guard `method path` with an optional schema and a route policy.
    pub fn route(
        mut self,
        method: Method,
        path: impl Into<String>,
        schema: Option<Schema>,
        policy: RoutePolicy,
    ) -> Self {
        Arc::make_mut(&mut self.routes).push(SecuredRoute {
            method,
            path: path.into(),
            schema,
            policy,
        });
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Headers trusted to carry the client address. Empty trusts only the peer.
    pub fn trusted_proxy_headers(mut self, headers: Vec<String>) -> Self {
        self.trusted_proxy_headers = Arc::new(headers);
        self
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService {
            inner,
            layer: self.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SecurityService<S> {
    inner: S,
    layer: SecurityLayer,
}

impl<S> Service<Request<Body>> for SecurityService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();
        // Take the service that was polled ready, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let route = layer
                .routes
                .iter()
                .find(|r| r.method == request.method() && r.path == request.uri().path())
                .cloned();
            let Some(route) = route else {
                return inner.call(request).await;
            };

            let (mut parts, body) = request.into_parts();
            let csrf = layer.pipeline.csrf().config();
            let jar = HeaderCookieJar::from_headers(&parts.headers);
            let remote_addr = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);

            let mut raw = RawRequest::new(parts.method.clone(), parts.uri.path(), Value::Null)
                .with_client_ip(extract_client_ip(&parts.headers, remote_addr, &layer.trusted_proxy_headers));
            raw.user_agent = header_str(&parts.headers, header::USER_AGENT.as_str());
            raw.request_id = header_str(&parts.headers, X_REQUEST_ID.as_str());
            raw.csrf_token = header_str(&parts.headers, &csrf.header_name);
            raw.csrf_cookie = jar.get(&csrf.cookie_name);

            // Quota is charged before the body is read, so oversized and
            // malformed bodies still count against the client.
            let rate_limit = match layer.pipeline.admit(&raw, &route.policy) {
                Ok(decision) => decision,
                Err(rejection) => return Ok(rejection.into_response()),
            };
            let request_id = raw.request_id.clone();
            let reject = |stage: &'static str, error: BastionError| {
                layer
                    .pipeline
                    .reject(stage, error, rate_limit, request_id.as_deref())
                    .into_response()
            };
            let body_error = |detail: ErrorDetail| reject("body", BastionError::validation(vec![detail]));

            let bytes = match to_bytes(body, layer.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(_) => return Ok(body_error(too_large(layer.max_body_bytes))),
            };
            if !bytes.is_empty() {
                match serde_json::from_slice(&bytes) {
                    Ok(value) => raw.body = value,
                    Err(e) => return Ok(body_error(invalid_json(&e))),
                }
            }

            let sanitized = match layer.pipeline.process_admitted(raw, route.schema.as_ref(), &route.policy, rate_limit) {
                PipelineResult::Ok { data, .. } => data,
                PipelineResult::Rejected(rejection) => return Ok(rejection.into_response()),
            };

            let encoded = match serde_json::to_vec(&sanitized) {
                Ok(encoded) => encoded,
                Err(e) => {
                    return Ok(reject(
                        "internal",
                        BastionError::internal("failed to re-encode sanitised body").with_source(e),
                    ))
                }
            };
            parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
            parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            parts.extensions.insert(SanitizedPayload(sanitized));
            debug!(path = %parts.uri.path(), "Forwarding sanitised request");

            let mut response = inner.call(Request::from_parts(parts, Body::from(encoded))).await?;
            if let Some(decision) = &rate_limit {
                apply_rate_limit_headers(response.headers_mut(), decision);
            }
            Ok(response)
        })
    }
}

fn header_str(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn too_large(limit: usize) -> ErrorDetail {
    ErrorDetail {
        field: "body".to_string(),
        message: format!("must be at most {} bytes", limit),
        code: Some("too_large".to_string()),
    }
}

// The parser message carries only line and column, never the input.
fn invalid_json(error: &serde_json::Error) -> ErrorDetail {
    ErrorDetail {
        field: "body".to_string(),
        message: format!("must be valid JSON ({}:{})", error.line(), error.column()),
        code: Some("invalid_json".to_string()),
    }
}
