//! Liveness and readiness over HTTP.
//!
//! - `GET /health`: 200 while the process is up.
//! - `GET /ready`: 200 when the broker connection is `Ready`, 503 otherwise.
//!   Both carry the same JSON body so probes and humans see why.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tasklane_queue::{ConnectionPhase, DispatcherMonitor};

#[derive(Debug, Clone)]
pub struct HealthState {
    phase: watch::Receiver<ConnectionPhase>,
    dispatcher: DispatcherMonitor,
}

impl HealthState {
    pub fn new(phase: watch::Receiver<ConnectionPhase>, dispatcher: DispatcherMonitor) -> Self {
        Self { phase, dispatcher }
    }

    fn snapshot(&self) -> Readiness {
        Readiness {
            phase: self.phase.borrow().as_str(),
            subscriptions: self.dispatcher.active_subscriptions(),
            in_flight: self.dispatcher.in_flight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub phase: &'static str,
    pub subscriptions: usize,
    pub in_flight: usize,
}

impl Readiness {
    fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready.as_str()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<Readiness>) {
    let readiness = state.snapshot();
    let status = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

/// Serve the health router on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: HealthState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "health endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
