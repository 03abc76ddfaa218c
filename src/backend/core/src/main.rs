//! Bastion Server - demo HTTP service behind the request pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use bastion_core::{
    config::Config,
    http::{issue_csrf_token, HeaderCookieJar, SanitizedPayload, SecurityLayer},
    pipeline::{RequestPipeline, RoutePolicy},
    security::{rate_limit, CsrfManager, RateLimiter, SecurityEventLogger, TracingSink},
    telemetry::init_logging,
    validation::schemas,
};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RequestPipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    config.validate()?;
    init_logging(&config.logging)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Bastion server");

    let events = Arc::new(SecurityEventLogger::new(config.pipeline.redaction).with_sink(TracingSink));
    let csrf = Arc::new(CsrfManager::new(config.csrf.clone(), events.clone())?);
    let limiter = Arc::new(RateLimiter::with_policies(config.rate_limit.clone()));
    let sweeper = rate_limit::spawn_sweeper(
        limiter.clone(),
        config.rate_limit.effective_sweep_interval(),
    );

    let pipeline = Arc::new(RequestPipeline::new(
        limiter,
        csrf,
        events,
        config.pipeline.clone(),
    ));

    let app = build_router(AppState { pipeline }, &config);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn build_router(state: AppState, config: &Config) -> Router {
    let security = SecurityLayer::new(state.pipeline.clone())
        .max_body_bytes(config.server.max_body_bytes)
        .trusted_proxy_headers(config.server.trusted_proxy_headers.clone())
        .route(Method::GET, "/api/csrf-token", None, RoutePolicy::new("api"))
        .route(
            Method::POST,
            "/api/auth/signup",
            Some(schemas::signup().clone()),
            RoutePolicy::new("auth"),
        )
        .route(
            Method::POST,
            "/api/auth/login",
            Some(schemas::login().clone()),
            RoutePolicy::new("auth"),
        )
        .route(
            Method::POST,
            "/api/contact",
            Some(schemas::contact().clone()),
            RoutePolicy::new("api"),
        )
        .route(
            Method::POST,
            "/api/files",
            Some(schemas::file_request().clone()),
            RoutePolicy::new("upload"),
        );

    Router::new()
        .route("/health", get(health))
        .route("/api/csrf-token", get(csrf_token))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/contact", post(contact))
        .route("/api/files", post(files))
        .layer(security)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn csrf_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut jar = HeaderCookieJar::from_headers(&headers);
    let token = issue_csrf_token(state.pipeline.csrf(), &mut jar);
    let mut response = Json(json!({ "csrfToken": token })).into_response();
    jar.write_to(response.headers_mut());
    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupForm {
    email: String,
    display_name: Option<String>,
}

async fn signup(Json(form): Json<SignupForm>) -> (StatusCode, Json<Value>) {
    tracing::info!(email = %form.email, "Signup accepted");
    (
        StatusCode::CREATED,
        Json(json!({
            "email": form.email,
            "displayName": form.display_name,
        })),
    )
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
}

async fn login(Json(form): Json<LoginForm>) -> Json<Value> {
    tracing::info!(email = %form.email, "Login accepted");
    Json(json!({ "status": "accepted" }))
}

async fn contact(Extension(SanitizedPayload(message)): Extension<SanitizedPayload>) -> Json<Value> {
    tracing::info!(fields = message.as_object().map_or(0, |m| m.len()), "Contact message received");
    Json(json!({ "received": true }))
}

/// Echo a simulated upstream file payload through outbound sanitisation.
async fn files(
    State(state): State<AppState>,
    Extension(SanitizedPayload(request)): Extension<SanitizedPayload>,
) -> Json<Value> {
    let file_id = request.get("fileId").cloned().unwrap_or(Value::Null);
    let upstream = json!({
        "id": file_id,
        "name": "<script>alert(1)</script>Design System",
        "document": {
            "children": [
                {"name": "Frame <img src=x onerror=alert(1)>", "type": "FRAME"},
                {"name": "Button", "type": "COMPONENT"},
            ],
        },
        "nodeIds": request.get("nodeIds").cloned().unwrap_or_else(|| json!([])),
    });
    Json(state.pipeline.sanitize_outbound(upstream))
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
