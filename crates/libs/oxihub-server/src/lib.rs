//! HTTP surface of the oxihub artifact hub.
//!
//! Thin layer over `oxihub-core`: route table, auth middleware, error
//! mapping, rate limiting and the operational endpoints (`/health`,
//! `/ready`, `/metrics`). All domain behaviour lives in the core crate.

use axum::http::header::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use oxihub_common::config::AppConfig;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

// Modules
pub mod api;
pub mod auth;
pub mod error;
pub mod ratelimit;

pub use error::ServerError;
pub use oxihub_core::ModelManager;

// --- Application State
#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub mm: ModelManager,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,
    pub ratelimit_config: ratelimit::RateLimitConfig,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[allow(clippy::expect_used)] // Metrics setup is infallible; panic acceptable during initialization
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            const EXPONENTIAL_SECONDS: &[f64] = &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ];

            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("http_request_duration_seconds".to_string()),
                    EXPONENTIAL_SECONDS,
                )
                .expect("Failed to set buckets")
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Builds the full application router for the given state. Exposed so the
/// e2e tests can drive it without binding a socket.
pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            ratelimit::rate_limit_middleware,
        ))
        // Public operational routes (no auth, no rate limit)
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(app_state)
}

pub fn build_state(mm: ModelManager) -> AppState {
    AppState {
        mm,
        metrics_handle: setup_metrics(),
        start_time: Instant::now(),
        ratelimit_config: ratelimit::RateLimitConfig::new(),
    }
}

pub async fn run(config: Arc<AppConfig>) -> std::result::Result<(), ServerError> {
    // Tracing is initialized by the caller (main binary).
    let mm = ModelManager::new(config.clone()).await?;
    let app_state = build_state(mm.clone());
    let app = router(app_state);

    // Background maintenance lives and dies with the listener.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let gc_handle = tokio::spawn(oxihub_core::gc::run_background(mm, shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid listen address: {e}")))?;
    tracing::info!("oxihub server starting on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    let _ = gc_handle.await;
    Ok(())
}

#[allow(clippy::expect_used)] // Signal handler setup is infallible in practice
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "healthy",
        uptime_seconds: uptime,
    };
    (StatusCode::OK, axum::Json(response))
}

#[derive(serde::Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.mm.health_check().await {
        Ok(true) => "connected",
        _ => "disconnected",
    };

    let is_ready = db_status == "connected";
    let response = ReadyResponse {
        status: if is_ready { "ready" } else { "not_ready" },
        database: db_status,
    };

    let status_code = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, axum::Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
