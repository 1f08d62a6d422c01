//! API layer - routes, handlers, and middleware

pub mod handlers;
pub mod middleware;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use handlers::{admin, autocomplete, batch, fhir, health, mapping, metrics};
use serde_json::json;

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors_origins = state.config.server.cors_origins.clone();

    let fhir_router = Router::new()
        .route("/metadata", get(fhir::metadata))
        .route("/CodeSystem", get(fhir::code_systems))
        .route(
            "/CodeSystem/$lookup",
            get(fhir::lookup_get).post(fhir::lookup_post),
        )
        .route("/CodeSystem/:id", get(fhir::code_system))
        .route("/ConceptMap/$translate", post(fhir::translate))
        .route("/ValueSet/$expand", get(fhir::expand));

    let admin_router = Router::new()
        .route("/cache/stats", get(admin::cache_stats))
        .route("/cache/clear", post(admin::cache_clear))
        .route("/ratelimit/stats", get(admin::ratelimit_stats))
        .route("/jobs/stats", get(admin::jobs_stats))
        .route("/audit", get(admin::audit_query))
        .route("/embeddings/stats", get(admin::embeddings_stats))
        .route("/embeddings/generate", post(admin::embeddings_generate));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .route("/mapping", post(mapping::translate).get(mapping::list))
        .route("/mapping/stats", get(mapping::stats))
        .route("/mapping/:id/validate", put(mapping::validate))
        .route("/mapping/batch", post(batch::batch_sync))
        .route("/mapping/batch/async", post(batch::batch_async))
        .route(
            "/mapping/batch/:id",
            get(batch::job_status).delete(batch::cancel_job),
        )
        .route("/mapping/batch/:id/results", get(batch::job_results))
        .route("/autocomplete/source", get(autocomplete::source))
        .route("/autocomplete/target", get(autocomplete::target))
        .nest("/fhir", fhir_router)
        .nest("/admin", admin_router)
        .with_state(state.clone())
        // Applied in reverse order: the last layer is outermost.
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::audit_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::compression())
        .layer(middleware::cors(&cors_origins))
        .layer(DefaultBodyLimit::max(max_body_size))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "server": "setu",
        "description": "NAMASTE to ICD-11 TM2 terminology bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "fhir": "/fhir/metadata",
        "health": "/health",
    }))
}
