//! Prometheus scrape endpoint

use crate::state::AppState;
use axum::{extract::State, http::header, response::IntoResponse};

/// `GET /metrics`: text exposition format. Cache and job gauges are
/// refreshed from their registries at scrape time.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    crate::metrics::record_cache_stats(&state.caches.stats());
    let _ = state.jobs.stats();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}
