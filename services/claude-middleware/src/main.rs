//! Claude middleware
//!
//! Reverse proxy in front of an upstream Claude API. Each inbound request is
//! forwarded with the client's `x-api-key` replaced by a backend account id
//! drawn from a pool. The pool is refreshed from a Redis registry on a fixed
//! interval; per-account health marks demote accounts that rate limit or
//! fail, and a single retry moves a failing request to a different account.

mod auth;
mod config;
mod metrics;
mod proxy;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use claude_pool::{AccountPool, HealthTracker, REFRESH_INTERVAL, spawn_refresh_task};
use claude_registry::{AccountRegistry, RedisRegistry};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AuthConfig, Config, ServerMode};
use crate::proxy::ProxyState;

/// TCP connect timeout for the upstream HTTP client (distinct from the
/// per-request timeout)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum idle connections per host in the reqwest connection pool
const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    prometheus: PrometheusHandle,
}

/// Build the axum router.
///
/// The admission and concurrency-limit layers cover only the proxy routes;
/// `/health` and `/metrics` stay outside so probes and scrapes are never
/// rejected by a key check or blocked by slow proxy requests occupying all
/// `max_connections` slots.
fn build_router(state: AppState, auth: Arc<AuthConfig>, max_connections: usize) -> Router {
    let proxy_routes = Router::new()
        .route("/v1/{*path}", any(proxy_handler))
        .route("/api/v1/{*path}", any(proxy_handler))
        .route("/claude/v1/{*path}", any(proxy_handler))
        .route("/gemini/{*path}", any(proxy_handler))
        .route("/openai/gemini/v1/{*path}", any(proxy_handler))
        .route("/openai/claude/v1/{*path}", any(proxy_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            auth,
            auth::require_api_key,
        ))
        .route_layer(tower::limit::ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(proxy_routes)
        .with_state(state)
}

/// Initialize tracing: JSON logs in production, human-readable otherwise.
/// The filter comes from LOG_LEVEL, then RUST_LOG, then defaults to info.
fn init_tracing(mode: ServerMode) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if mode == ServerMode::Production {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.server.mode);

    info!(
        port = config.server.port,
        mode = ?config.server.mode,
        upstream = %config.proxy.target_url,
        timeout_secs = config.proxy.timeout_secs,
        max_connections = config.proxy.max_connections,
        "starting claude-middleware"
    );
    info!(
        host = %config.registry.host,
        port = config.registry.port,
        db = config.registry.db,
        password_set = config.registry.password.is_set(),
        "registry configuration"
    );
    info!(
        enabled = config.auth.enabled,
        keys = config.auth.api_keys.len(),
        prefix = %config.auth.prefix,
        "admission configuration"
    );

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // A registry that cannot be reached at startup is fatal; later failures
    // only log and keep the previous pool snapshot.
    let registry = RedisRegistry::connect(&config.registry.connection_url())
        .await
        .context("failed to connect to account registry")?;
    info!("connected to account registry");
    let registry: Arc<dyn AccountRegistry> = Arc::new(registry);

    let pool = Arc::new(AccountPool::new(registry));
    let health = Arc::new(HealthTracker::new());

    // Initial synchronous refresh so the pool can serve immediately
    pool.refresh().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let refresh_task = spawn_refresh_task(pool.clone(), REFRESH_INTERVAL, shutdown_rx);

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build()
        .context("failed to build HTTP client")?;

    let state = AppState {
        proxy: ProxyState {
            client,
            upstream_url: config.proxy.target_url.clone(),
            pool,
            health,
            timeout: Duration::from_secs(config.proxy.timeout_secs),
        },
        prometheus,
    };
    let app = build_router(
        state,
        Arc::new(config.auth.clone()),
        config.proxy.max_connections,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop the background refresh before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = refresh_task.await {
        error!(error = %e, "refresh task did not stop cleanly");
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness endpoint, exempt from admission checks.
async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "status": "ok", "service": "claude-middleware" }).to_string(),
    )
}

/// Prometheus metrics endpoint — text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Handler for all proxied path patterns.
async fn proxy_handler(State(state): State<AppState>, request: axum::extract::Request) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
