//! Batch mapping endpoints (sync lookup and async jobs)

use crate::models::{JobItem, SourceSystem};
use crate::state::AppState;
use crate::{Error, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BatchCode {
    pub code: String,
    pub system: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub codes: Vec<BatchCode>,
}

#[derive(Debug, Deserialize)]
pub struct AsyncBatchRequest {
    pub codes: Vec<BatchCode>,
    pub callback_url: Option<String>,
    #[serde(default = "default_save_results")]
    pub save_results: bool,
}

fn default_save_results() -> bool {
    true
}

fn parse_codes(
    codes: &[BatchCode],
    max_batch_size: usize,
) -> Result<Vec<(String, SourceSystem)>> {
    if codes.is_empty() {
        return Err(Error::Validation("codes must not be empty".to_string()));
    }
    if codes.len() > max_batch_size {
        return Err(Error::Validation(format!(
            "batch size {} exceeds the maximum of {max_batch_size}",
            codes.len()
        )));
    }
    codes
        .iter()
        .map(|entry| {
            let code = entry.code.trim();
            if code.is_empty() {
                return Err(Error::Validation("code must not be empty".to_string()));
            }
            let system: SourceSystem = entry.system.parse().map_err(Error::Validation)?;
            Ok((code.to_string(), system))
        })
        .collect()
}

/// `POST /mapping/batch`: look up existing mappings only; the pipeline
/// never runs here.
pub async fn batch_sync(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> Result<impl IntoResponse> {
    let codes = parse_codes(&body.codes, state.config.jobs.max_batch_size)?;
    let results = state.translate.batch_lookup(&codes).await?;

    let matched = results
        .iter()
        .filter(|r| r["matched"].as_bool().unwrap_or(false))
        .count();

    Ok(Json(json!({
        "total": results.len(),
        "matched": matched,
        "unmatched": results.len() - matched,
        "results": results,
    })))
}

/// `POST /mapping/batch/async`: admit a job, reply 202 immediately.
pub async fn batch_async(
    State(state): State<AppState>,
    Json(body): Json<AsyncBatchRequest>,
) -> Result<impl IntoResponse> {
    let codes = parse_codes(&body.codes, state.config.jobs.max_batch_size)?;

    if let Some(url) = &body.callback_url {
        url::Url::parse(url)
            .map_err(|e| Error::Validation(format!("callback_url is not a valid URL: {e}")))?;
    }

    let items: Vec<JobItem> = codes
        .into_iter()
        .map(|(code, system)| JobItem::new(code, system))
        .collect();
    let estimated_time = state.jobs.estimate_seconds(items.len());

    let mut snapshot = state
        .jobs
        .submit(items, None, body.callback_url, body.save_results)?;
    snapshot["estimated_time_seconds"] = json!(estimated_time);

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `GET /mapping/batch/:id`: status snapshot.
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let snapshot = state
        .jobs
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("Job {id} not found")))?;
    Ok(Json(snapshot))
}

/// `GET /mapping/batch/:id/results`: per-item results, pending included.
pub async fn job_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let job = state
        .jobs
        .results(id)
        .ok_or_else(|| Error::NotFound(format!("Job {id} not found")))?;
    Ok(Json(json!({
        "job_id": job.id,
        "status": job.status,
        "progress": job.progress,
        "items": job.items,
    })))
}

/// `DELETE /mapping/batch/:id`: cancel.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let snapshot = state.jobs.cancel(id)?;
    Ok(Json(snapshot))
}
