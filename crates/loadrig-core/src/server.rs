//! Time-of-day HTTP service the harness can be pointed at.
//!
//! `/time` sits behind the admission gate and the simulated latency;
//! `/health` is never gated.

use crate::config::ServerConfig;
use crate::gate::AdmissionGate;
use crate::latency::LatencySimulator;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ServerState {
    pub gate: AdmissionGate,
    pub latency: Option<Arc<LatencySimulator>>,
}

impl ServerState {
    pub fn new(gate: AdmissionGate, latency: Option<LatencySimulator>) -> Self {
        Self {
            gate,
            latency: latency.map(Arc::new),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let latency = (config.avg_response_ms > 0)
            .then(|| LatencySimulator::new(config.avg_response_ms, config.deviation_ms));
        Self::new(AdmissionGate::new(config.max_inflight), latency)
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/time", get(time_page))
        .route_layer(middleware::from_fn_with_state(state.clone(), admission))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves, then finishes in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(
        "Listening on http://{} (max_inflight={}, latency={})",
        addr,
        state.gate.max_inflight(),
        state
            .latency
            .as_ref()
            .map(|l| format!("{:?}±{:?}", l.mean(), l.stddev()))
            .unwrap_or_else(|| "none".to_string())
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Admits the request or answers 503. An admitted request holds its permit
/// until the response has been produced.
async fn admission(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let Some(_permit) = state.gate.try_acquire() else {
        debug!(inflight = state.gate.inflight(), "Rejecting request, server busy");
        return (StatusCode::SERVICE_UNAVAILABLE, "server busy\n").into_response();
    };

    if let Some(latency) = &state.latency {
        tokio::time::sleep(latency.sample()).await;
    }

    next.run(request).await
}

async fn time_page() -> String {
    let now = chrono::Local::now();
    let utc = now.with_timezone(&chrono::Utc);
    format!(
        "The time is now {} ({})\n",
        now.format("%b %e %H:%M:%S"),
        utc.format("%H:%M:%S UTC")
    )
}

async fn health() -> &'static str {
    "ok\n"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "page not found\n")
}
