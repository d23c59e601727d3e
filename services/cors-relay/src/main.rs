//! Cherry CORS relay
//!
//! Single-binary service that forwards browser calls to the Cherry API so
//! the SDK can reach it from pages on other origins:
//! 1. Reads the target from the `path` query parameter
//! 2. Forwards method and body with fixed JSON headers
//! 3. Falls back across schemes for relative targets
//! 4. Answers with permissive CORS headers

mod config;
mod error;
mod metrics;
mod relay;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::relay::RelayState;

/// Time allowed for in-flight requests after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    relay: RelayState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn new(relay: RelayState, prometheus: PrometheusHandle) -> Self {
        Self {
            relay,
            started_at: Instant::now(),
            prometheus,
        }
    }
}

fn relay_state(config: &config::RelayConfig, client: reqwest::Client) -> RelayState {
    RelayState {
        client,
        upstream_host: config.upstream_host.clone(),
        schemes: config.scheme_order.clone(),
        fallback_on_error_status: config.fallback_on_error_status,
        timeout: config.timeout_secs.map(Duration::from_secs),
        requests_total: Arc::new(AtomicU64::new(0)),
        errors_total: Arc::new(AtomicU64::new(0)),
    }
}

/// Build the axum router with all routes and shared state.
///
/// Everything except `/health` and `/metrics` is relayed. A concurrency
/// limit layer caps in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(relay_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON output; filter from LOG_LEVEL, then RUST_LOG, default info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting cherry-cors-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let (config, config_path) =
        Config::load_resolved(cli_config_path).context("failed to load configuration")?;

    info!(
        path = %config_path.display(),
        listen_addr = %config.relay.listen_addr,
        upstream_host = %config.relay.upstream_host,
        schemes = ?config.relay.scheme_order,
        fallback_on_error_status = config.relay.fallback_on_error_status,
        "configuration loaded"
    );

    let state = AppState::new(
        relay_state(&config.relay, reqwest::Client::new()),
        prometheus_handle,
    );
    let app = build_router(state, config.relay.max_connections);

    let listen_addr = config.relay.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, upstream, uptime and request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "upstream_host": state.relay.upstream_host,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.relay.requests_total.load(Ordering::Relaxed),
        "errors_total": state.relay.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that relays every other request.
async fn relay_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    relay::relay_request(&state.relay, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
