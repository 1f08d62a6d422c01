//! Interactive translate, mapping listing, stats and review actions

use crate::db::ListFilters;
use crate::models::{Equivalence, SourceSystem, ValidationStatus};
use crate::state::AppState;
use crate::{Error, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub code: String,
    pub system: String,
    #[allow(dead_code)]
    pub term: Option<String>,
    #[allow(dead_code)]
    pub context: Option<String>,
}

/// `POST /mapping`: run (or reuse) a translation for one source code.
pub async fn translate(
    State(state): State<AppState>,
    Json(body): Json<TranslateRequest>,
) -> Result<impl IntoResponse> {
    let code = body.code.trim();
    if code.is_empty() {
        return Err(Error::Validation("code must not be empty".to_string()));
    }
    let system: SourceSystem = body.system.parse().map_err(Error::Validation)?;

    let outcome = state.translate.translate(code, system).await?;

    Ok(Json(json!({
        "success": outcome.matched,
        "source": outcome.origin.as_str(),
        "mapping": outcome.mapping,
        "processing_time_ms": outcome.processing_time_ms,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub system: Option<String>,
    pub equivalence: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /mapping`: paginated listing.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(Error::Validation("limit must be within 1..=100".to_string()));
    }

    let filters = ListFilters {
        system: parse_opt::<SourceSystem>(params.system.as_deref())?,
        equivalence: parse_opt::<Equivalence>(params.equivalence.as_deref())?,
        min_confidence: params.min_confidence,
        max_confidence: params.max_confidence,
        status: parse_opt::<ValidationStatus>(params.status.as_deref())?,
        query: params.q.filter(|q| !q.trim().is_empty()),
        sort: params.sort,
        descending: !matches!(params.order.as_deref(), Some("asc")),
    };

    let (total, rows) = state.mappings.list(&filters, page, limit).await?;

    Ok(Json(json!({
        "total": total,
        "page": page,
        "limit": limit,
        "mappings": rows,
    })))
}

/// `GET /mapping/stats`
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.mappings.stats().await?;
    Ok(Json(json!({
        "total": stats.total,
        "by_mapping_source": stats.by_mapping_source
            .iter().map(|(k, v)| json!({ "mapping_source": k, "count": v })).collect::<Vec<_>>(),
        "by_validation_status": stats.by_validation_status
            .iter().map(|(k, v)| json!({ "validation_status": k, "count": v })).collect::<Vec<_>>(),
        "average_confidence": stats.average_confidence,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub status: String,
    pub validator: String,
    pub equivalence: Option<String>,
}

/// `PUT /mapping/:id/validate`: human review action.
pub async fn validate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ValidateRequest>,
) -> Result<impl IntoResponse> {
    if body.validator.trim().is_empty() {
        return Err(Error::Validation("validator must not be empty".to_string()));
    }
    let status: ValidationStatus = body.status.parse().map_err(Error::Validation)?;
    if status == ValidationStatus::Pending {
        return Err(Error::Validation(
            "validation cannot reset a mapping to PENDING".to_string(),
        ));
    }
    let equivalence = parse_opt::<Equivalence>(body.equivalence.as_deref())?;

    let mapping = state
        .mappings
        .validate(id, status, body.validator.trim(), equivalence)
        .await?;

    // The reviewed row may shadow a cached pipeline result.
    state.caches.mappings.clear();

    Ok((StatusCode::OK, Json(json!({ "mapping": mapping }))))
}

fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(Error::Validation),
    }
}
