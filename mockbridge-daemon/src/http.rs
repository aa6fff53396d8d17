//! Health and metrics HTTP endpoints.
//!
//! Serves `/health`, `/ready`, and `/metrics` (Prometheus text
//! exposition) on the configured metrics address. `/health` returns
//! 503 whenever any enabled module reports degradation, which includes
//! queue adapter retry exhaustion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::health::DaemonHealth;

/// Shared state for the endpoint handlers.
pub struct AppState {
    /// Latest aggregated health snapshot (refreshed by the orchestrator).
    pub health: RwLock<DaemonHealth>,
    /// Set once all enabled modules have started.
    pub ready: AtomicBool,
    /// Recorder handle used to render the exposition text.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates state with an initial "starting" health report.
    pub fn new(prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            health: RwLock::new(DaemonHealth::starting()),
            ready: AtomicBool::new(false),
            prometheus,
        }
    }

    /// Replaces the health snapshot.
    pub fn set_health(&self, health: DaemonHealth) {
        if let Ok(mut guard) = self.health.write() {
            *guard = health;
        }
    }

    /// Marks the daemon ready (all modules started).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

/// Binds the listener and serves the endpoints until cancellation.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(listen_addr = %addr, "health/metrics endpoint active");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state
        .health
        .read()
        .map(|h| h.clone())
        .unwrap_or_else(|_| DaemonHealth::starting());

    let code = if snapshot.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_owned()),
    }
}
