//! Liveness and readiness endpoints.
//!
//! - `GET /healthz` - always 200
//! - `GET /ready` - 200 while the event source has an open watch, 503 otherwise

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::AppResult;
use crate::source::Readiness;

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/ready", get(ready_handler))
        .with_state(readiness)
}

/// Binds `0.0.0.0:{port}` and serves in the background until `shutdown` fires.
/// Binding happens before returning so a taken port fails startup.
pub async fn spawn(
    port: u16,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> AppResult<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %listener.local_addr()?, "health server listening");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, router(readiness))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        if let Err(e) = served {
            tracing::error!(error = %e, "health server stopped");
        }
    }))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn ready_handler(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
