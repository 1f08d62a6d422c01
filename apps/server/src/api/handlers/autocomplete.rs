//! Autocomplete endpoints
//!
//! Short-TTL response caching via the `search` cache; only successful
//! responses are stored.

use crate::cache::response_key;
use crate::models::SourceSystem;
use crate::state::AppState;
use crate::{Error, Result};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

const MAX_LIMIT: i64 = 50;
const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Deserialize)]
pub struct AutocompleteParams {
    pub q: String,
    pub system: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /autocomplete/source`
pub async fn source(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Result<impl IntoResponse> {
    let (query, limit) = validate(&params)?;
    let system = match params.system.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<SourceSystem>().map_err(Error::Validation)?),
        None => None,
    };

    let key = response_key(
        "/autocomplete/source",
        &[
            ("q".to_string(), query.to_lowercase()),
            (
                "system".to_string(),
                system.map(|s| s.as_str().to_string()).unwrap_or_default(),
            ),
            ("limit".to_string(), limit.to_string()),
        ],
        None,
    );
    if let Some(cached) = state.caches.search.get(&key) {
        return Ok(Json(cached));
    }

    let rows = state.sources.autocomplete(query, system, limit).await?;
    let body = json!({
        "total": rows.len(),
        "results": rows.iter().map(|row| json!({
            "code": row.code,
            "system": row.system,
            "term": row.term,
            "english_name": row.english_name,
        })).collect::<Vec<_>>(),
    });

    state.caches.search.set(key, body.clone());
    Ok(Json(body))
}

/// `GET /autocomplete/target`
pub async fn target(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Result<impl IntoResponse> {
    let (query, limit) = validate(&params)?;

    let key = response_key(
        "/autocomplete/target",
        &[
            ("q".to_string(), query.to_lowercase()),
            ("limit".to_string(), limit.to_string()),
        ],
        None,
    );
    if let Some(cached) = state.caches.search.get(&key) {
        return Ok(Json(cached));
    }

    let rows = state.targets.autocomplete(query, limit).await?;
    let body = json!({
        "total": rows.len(),
        "results": rows.iter().map(|row| json!({
            "code": row.code,
            "title": row.title,
            "category": row.category,
        })).collect::<Vec<_>>(),
    });

    state.caches.search.set(key, body.clone());
    Ok(Json(body))
}

fn validate(params: &AutocompleteParams) -> Result<(&str, i64)> {
    let query = params.q.trim();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Err(Error::Validation(format!(
            "q must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    let limit = params.limit.unwrap_or(10);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(Error::Validation(format!(
            "limit must be within 1..={MAX_LIMIT}"
        )));
    }
    Ok((query, limit))
}
