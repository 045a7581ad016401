//! Liveness endpoint with upstream reachability probe.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::handler::AppState;
use crate::helpers::format_duration;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime: String,
    upstream_healthy: bool,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let upstream_healthy = match state.client.health().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "upstream LAPI health check failed");
            false
        }
    };

    let body = Health {
        status: if upstream_healthy { "healthy" } else { "degraded" },
        uptime: format_duration(state.started_at.elapsed()),
        upstream_healthy,
    };

    let code = if upstream_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
