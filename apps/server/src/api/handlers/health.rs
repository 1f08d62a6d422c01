//! Liveness and readiness probes

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /health`: process liveness only.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "setu",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health/ready`: database connectivity plus the upstream WHO
/// probe. An unreachable database is fatal (503); a failing upstream probe
/// degrades readiness because fresh catalog pulls would fail.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await
        .is_ok();

    let upstream = if !state.probe.configured() {
        json!({ "status": "unconfigured" })
    } else {
        match state.probe.probe().await {
            Ok(latency_ms) => json!({ "status": "ok", "latency_ms": latency_ms }),
            Err(e) => {
                tracing::warn!("Upstream probe failed: {e}");
                json!({ "status": "unreachable" })
            }
        }
    };

    let upstream_failing = upstream["status"] == "unreachable";
    let status = if !database_ok {
        StatusCode::SERVICE_UNAVAILABLE
    } else if upstream_failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = json!({
        "status": match (database_ok, upstream_failing) {
            (false, _) => "unavailable",
            (true, true) => "degraded",
            (true, false) => "ready",
        },
        "checks": {
            "database": if database_ok { "ok" } else { "unreachable" },
            "upstream": upstream,
        },
    });

    (status, Json(body))
}
