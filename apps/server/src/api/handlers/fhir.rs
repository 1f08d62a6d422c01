//! FHIR operation handlers
//!
//! Everything under `/fhir` speaks `application/fhir+json` and renders
//! errors as OperationOutcome via [`FhirError`]. Lookup and expand responses
//! go through the short-TTL `fhir` cache; translate shares the mapping
//! cache inside the translate service instead.

use crate::cache::response_key;
use crate::error::FhirError;
use crate::models::SourceSystem;
use crate::state::AppState;
use crate::Error;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

type FhirResult = std::result::Result<Response, FhirError>;

fn fhir_json(body: JsonValue) -> Response {
    let mut response = Json(body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/fhir+json; charset=utf-8"),
    );
    response
}

/// `GET /fhir/metadata`
pub async fn metadata(State(state): State<AppState>) -> Response {
    fhir_json(state.fhir.capability_statement())
}

/// `GET /fhir/CodeSystem`
pub async fn code_systems(State(state): State<AppState>) -> FhirResult {
    Ok(fhir_json(state.fhir.list_code_systems().await?))
}

/// `GET /fhir/CodeSystem/:id`
pub async fn code_system(State(state): State<AppState>, Path(id): Path<String>) -> FhirResult {
    Ok(fhir_json(state.fhir.read_code_system(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub system: Option<String>,
    pub code: Option<String>,
}

/// `GET/POST /fhir/CodeSystem/$lookup`
pub async fn lookup_get(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> FhirResult {
    let (system, code) = require_system_code(params.system, params.code)?;
    lookup_inner(&state, &system, &code).await
}

pub async fn lookup_post(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> FhirResult {
    let (system, code) = parameters_or_fields(&body)?;
    lookup_inner(&state, &system, &code).await
}

async fn lookup_inner(state: &AppState, system: &str, code: &str) -> FhirResult {
    let key = response_key(
        "/fhir/CodeSystem/$lookup",
        &[
            ("system".to_string(), system.to_string()),
            ("code".to_string(), code.to_uppercase()),
        ],
        None,
    );
    if let Some(cached) = state.caches.fhir.get(&key) {
        return Ok(fhir_json(cached));
    }

    let body = state.fhir.lookup(system, code).await?;
    state.caches.fhir.set(key, body.clone());
    Ok(fhir_json(body))
}

/// `POST /fhir/ConceptMap/$translate`: same decision path as `/mapping`.
pub async fn translate(State(state): State<AppState>, Json(body): Json<JsonValue>) -> FhirResult {
    let (system, code) = parameters_or_fields(&body)?;
    let system: SourceSystem = system
        .parse()
        .map_err(|e: String| FhirError(Error::Validation(e)))?;

    let parameters = state.fhir.translate(&code, system).await?;
    Ok(fhir_json(parameters))
}

#[derive(Debug, Deserialize)]
pub struct ExpandParams {
    pub filter: Option<String>,
    pub system: Option<String>,
    pub count: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /fhir/ValueSet/$expand`
pub async fn expand(
    State(state): State<AppState>,
    Query(params): Query<ExpandParams>,
) -> FhirResult {
    let count = params.count.unwrap_or(20).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);
    let system = match params.system.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<SourceSystem>()
                .map_err(|e| FhirError(Error::Validation(e)))?,
        ),
        None => None,
    };

    let key = response_key(
        "/fhir/ValueSet/$expand",
        &[
            (
                "filter".to_string(),
                params.filter.clone().unwrap_or_default().to_lowercase(),
            ),
            (
                "system".to_string(),
                system.map(|s| s.as_str().to_string()).unwrap_or_default(),
            ),
            ("count".to_string(), count.to_string()),
            ("offset".to_string(), offset.to_string()),
        ],
        None,
    );
    if let Some(cached) = state.caches.fhir.get(&key) {
        return Ok(fhir_json(cached));
    }

    let body = state
        .fhir
        .expand(params.filter.as_deref(), system, count, offset)
        .await?;
    state.caches.fhir.set(key, body.clone());
    Ok(fhir_json(body))
}

fn require_system_code(
    system: Option<String>,
    code: Option<String>,
) -> std::result::Result<(String, String), FhirError> {
    match (system, code) {
        (Some(system), Some(code)) if !system.is_empty() && !code.is_empty() => {
            Ok((system, code))
        }
        _ => Err(FhirError(Error::Validation(
            "Both 'system' and 'code' parameters are required".to_string(),
        ))),
    }
}

/// Accept either a FHIR Parameters resource or a plain JSON object with
/// `system`/`code` fields.
fn parameters_or_fields(body: &JsonValue) -> std::result::Result<(String, String), FhirError> {
    if body.get("resourceType").and_then(|v| v.as_str()) == Some("Parameters") {
        let mut system = None;
        let mut code = None;
        if let Some(parameters) = body.get("parameter").and_then(|v| v.as_array()) {
            for parameter in parameters {
                match parameter.get("name").and_then(|v| v.as_str()) {
                    Some("system") => {
                        system = parameter
                            .get("valueUri")
                            .or_else(|| parameter.get("valueString"))
                            .and_then(|v| v.as_str())
                            .map(String::from);
                    }
                    Some("code") => {
                        code = parameter
                            .get("valueCode")
                            .or_else(|| parameter.get("valueString"))
                            .and_then(|v| v.as_str())
                            .map(String::from);
                    }
                    _ => {}
                }
            }
        }
        return require_system_code(system, code);
    }

    let system = body
        .get("system")
        .and_then(|v| v.as_str())
        .map(String::from);
    let code = body.get("code").and_then(|v| v.as_str()).map(String::from);
    require_system_code(system, code)
}
