//! Probe and metrics endpoint
//!
//! - `GET /healthz`: process is alive
//! - `GET /readyz`: controller loop is running
//! - `GET /metrics`: Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ControllerError;

/// Counters exported on `/metrics`
#[derive(Clone)]
pub struct Metrics {
    reconciles: IntCounterVec,
    feature_mutations: IntCounterVec,
    registry: Registry,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all counters on a private registry
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("audit_operator_reconciles_total", "Reconcile passes by result"),
            &["result"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        let feature_mutations = IntCounterVec::new(
            Opts::new(
                "audit_operator_feature_mutations_total",
                "Passes in which a feature changed cluster state",
            ),
            &["feature"],
        )?;
        registry.register(Box::new(feature_mutations.clone()))?;

        Ok(Self {
            reconciles,
            feature_mutations,
            registry,
        })
    }

    /// Count a finished pass (`converged`, `requeue` or `error`)
    pub fn record_reconcile(&self, result: &str) {
        self.reconciles.with_label_values(&[result]).inc();
    }

    /// Count a pass in which `feature` mutated the cluster
    pub fn record_feature_mutation(&self, feature: &str) {
        self.feature_mutations.with_label_values(&[feature]).inc();
    }

    /// Current value of the reconcile counter for `result`
    #[cfg(test)]
    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconciles.with_label_values(&[result]).get()
    }

    /// Current value of the mutation counter for `feature`
    #[cfg(test)]
    pub fn feature_mutation_count(&self, feature: &str) -> u64 {
        self.feature_mutations.with_label_values(&[feature]).get()
    }

    /// Render every registered metric in the text format
    pub fn encode(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[derive(Debug, Clone)]
struct ProbeState {
    ready: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

/// Build the probe router
pub fn router(ready: Arc<AtomicBool>, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ProbeState { ready, metrics })
}

/// Serve the probe router until the task is dropped
pub async fn serve(address: SocketAddr, ready: Arc<AtomicBool>, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Probe server listening on {}", address);
    axum::serve(listener, router(ready, metrics)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
