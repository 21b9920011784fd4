//! Prometheus metrics and Kubernetes health checks.
//!
//! Exported metrics:
//! - `api_controller_syncs_total{kind,result}`: finished syncs per event kind
//! - `api_controller_retries_dropped_total`: events dropped after exhausting retries
//! - `api_controller_queue_depth`: pending events
//!
//! `/healthz` always answers 200, `/readyz` only once the ApiExposure cache
//! has synced.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Controller metrics and readiness flag
pub struct Metrics {
    registry: Registry,
    syncs: IntCounterVec,
    retries_dropped: IntCounter,
    queue_depth: IntGauge,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let syncs = IntCounterVec::new(
            Opts::new("api_controller_syncs_total", "Finished syncs by event kind and result"),
            &["kind", "result"],
        )?;
        let retries_dropped = IntCounter::new(
            "api_controller_retries_dropped_total",
            "Events dropped after exhausting their retries",
        )?;
        let queue_depth = IntGauge::new("api_controller_queue_depth", "Events waiting in the work queue")?;

        registry.register(Box::new(syncs.clone()))?;
        registry.register(Box::new(retries_dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            syncs,
            retries_dropped,
            queue_depth,
            ready: AtomicBool::new(false),
        })
    }

    /// Count a finished sync; `result` is "success" or "error"
    pub fn record_sync(&self, kind: &str, result: &str) {
        self.syncs.with_label_values(&[kind, result]).inc();
    }

    pub fn record_dropped(&self) {
        self.retries_dropped.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("ApiExposure cache synced, controller ready");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Router serving `/metrics`, `/healthz` and `/readyz`
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serve metrics and health checks on `addr` until the listener fails.
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics and health checks listening on {}", listener.local_addr()?);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> StatusCode {
    if metrics.is_ready() {
        StatusCode::OK
    } else {
        debug!("Readiness check: cache not synced yet");
        StatusCode::SERVICE_UNAVAILABLE
    }
}
