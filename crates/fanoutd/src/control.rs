use crate::distributor::Distribution;
use crate::registry::ClientSummary;
use crate::server::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Room for the JSON envelope around a maximum-size payload.
const BODY_OVERHEAD: usize = 4096;

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
struct BroadcastResponse {
    success: bool,
    #[serde(flatten)]
    distribution: Distribution,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    server: &'static str,
    version: &'static str,
    uptime_secs: u64,
    clients: ClientsStatus,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ClientsStatus {
    connected: usize,
    list: Vec<ClientSummary>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

/// Build the control-plane routes.
///
/// `/metrics` is only mounted when a Prometheus handle is given.
pub fn router(state: Arc<ServerState>, prometheus: Option<PrometheusHandle>) -> Router {
    let body_limit = state.config.max_payload.saturating_add(BODY_OVERHEAD);
    let app = Router::new()
        .route("/api/clients", get(list_clients))
        .route("/api/status", get(status))
        .route("/api/broadcast", post(broadcast))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    match prometheus {
        Some(handle) => app.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        ),
        None => app,
    }
}

/// Serve the control plane on `listener` until `shutdown_rx` fires.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    prometheus: Option<PrometheusHandle>,
    mut shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<()> {
    info!("control plane listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state, prometheus))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;
    Ok(())
}

async fn list_clients(State(state): State<Arc<ServerState>>) -> Json<Vec<ClientSummary>> {
    Json(state.registry.snapshot())
}

async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let list = state.registry.snapshot();
    Json(StatusResponse {
        server: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        clients: ClientsStatus {
            connected: list.len(),
            list,
        },
        timestamp: Utc::now(),
    })
}

async fn broadcast(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(rejection) => {
            warn!("invalid broadcast request: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, "invalid json body");
        }
    };

    let Some(payload) = request.payload else {
        return error_response(StatusCode::BAD_REQUEST, "payload is missing");
    };

    match state.distributor.distribute(&state.registry, &payload) {
        Ok(distribution) => Json(BroadcastResponse {
            success: true,
            distribution,
        })
        .into_response(),
        Err(e) => {
            info!(reason = %e, "broadcast payload refused");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 while draining.
async fn ready_handler(State(state): State<Arc<ServerState>>) -> (StatusCode, Json<ReadyResponse>) {
    if state.health.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}
