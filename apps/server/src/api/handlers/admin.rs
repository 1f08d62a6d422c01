//! Internal admin endpoints: cache and limiter stats, audit queries,
//! embedding coverage and on-demand embedding generation.

use crate::services::pipeline::normalize;
use crate::state::AppState;
use crate::{Error, Result};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// `GET /admin/cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.caches.stats())
}

/// `POST /admin/cache/clear`
pub async fn cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.caches.clear_all();
    tracing::info!("All caches cleared by admin request");
    Json(json!({ "cleared": true }))
}

/// `GET /admin/ratelimit/stats`
pub async fn ratelimit_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rate_limiter.stats())
}

/// `GET /admin/jobs/stats`
pub async fn jobs_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.jobs.stats())
}

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /admin/audit`
pub async fn audit_query(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(50);
    if !(1..=500).contains(&limit) {
        return Err(Error::Validation("limit must be within 1..=500".to_string()));
    }

    let repo = crate::db::AuditLogRepository::new(state.db_pool.clone());
    let rows = repo
        .query(
            params.actor.as_deref(),
            params.action.as_deref(),
            params.since,
            page,
            limit,
        )
        .await?;

    Ok(Json(json!({ "page": page, "limit": limit, "records": rows })))
}

/// `GET /admin/embeddings/stats`: coverage per catalog.
pub async fn embeddings_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let (source_total, source_embedded) = state.sources.embedding_coverage().await?;
    let (target_total, target_embedded) = state.targets.embedding_coverage().await?;

    Ok(Json(json!({
        "source": coverage(source_total, source_embedded),
        "target": coverage(target_total, target_embedded),
    })))
}

fn coverage(total: i64, embedded: i64) -> serde_json::Value {
    json!({
        "total": total,
        "with_embedding": embedded,
        "percentage": if total > 0 {
            (embedded as f64 / total as f64 * 100.0).round()
        } else {
            0.0
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateParams {
    /// "source" or "target".
    pub catalog: Option<String>,
    pub limit: Option<i64>,
}

/// `POST /admin/embeddings/generate`: embed rows missing a vector, one
/// bounded batch per call.
pub async fn embeddings_generate(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> Result<impl IntoResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let catalog = params.catalog.as_deref().unwrap_or("target");

    let (processed, failed) = match catalog {
        "source" => {
            let rows = state.sources.missing_embeddings(limit).await?;
            let mut processed = 0usize;
            let mut failed = 0usize;
            for row in rows {
                let text = normalize(&row);
                let text = if text.is_empty() { row.code.to_lowercase() } else { text };
                match state.embedder.embed_document(&text).await {
                    Ok(vector) => {
                        state.sources.set_embedding(row.id, vector).await?;
                        processed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(code = %row.code, "Embedding generation failed: {e}");
                        failed += 1;
                    }
                }
            }
            (processed, failed)
        }
        "target" => {
            let rows = state.targets.missing_embeddings(limit).await?;
            let mut processed = 0usize;
            let mut failed = 0usize;
            for row in rows {
                let mut text = format!("{} {}", row.title, row.definition.as_deref().unwrap_or(""));
                if !row.synonyms.is_empty() {
                    text.push(' ');
                    text.push_str(&row.synonyms.join(" "));
                }
                match state.embedder.embed_document(text.trim()).await {
                    Ok(vector) => {
                        state.targets.set_embedding(row.id, vector).await?;
                        processed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(code = %row.code, "Embedding generation failed: {e}");
                        failed += 1;
                    }
                }
            }
            (processed, failed)
        }
        other => {
            return Err(Error::Validation(format!(
                "catalog must be 'source' or 'target', got '{other}'"
            )))
        }
    };

    Ok(Json(json!({
        "catalog": catalog,
        "processed": processed,
        "failed": failed,
    })))
}
