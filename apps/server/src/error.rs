//! Error types for the terminology bridge

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after: u64 },

    #[error("Mapping pipeline exceeded the {deadline_ms} ms deadline")]
    Deadline { deadline_ms: u64 },

    #[error("Upstream model error: {0}")]
    UpstreamModel(String),

    #[error("Upstream terminology service error: {0}")]
    UpstreamService(String),

    #[error("Job queue error: {0}")]
    JobQueue(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Machine-readable label included in every error payload.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Database(_) => "database_unavailable",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::RateLimited { .. } => "rate_limited",
            Error::Deadline { .. } => "mapping_timeout",
            Error::UpstreamModel(_) => "upstream_model",
            Error::UpstreamService(_) => "upstream_service",
            Error::JobQueue(_) | Error::Internal(_) | Error::Other(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Deadline { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamModel(_) | Error::UpstreamService(_) => StatusCode::BAD_GATEWAY,
            Error::JobQueue(_) | Error::Internal(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            // Never leak internals to the caller.
            Error::Database(_) => "Database temporarily unavailable".to_string(),
            Error::JobQueue(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.label(),
            "message": message,
        });

        if let Error::RateLimited { retry_after, .. } = &self {
            body["retry_after"] = json!(retry_after);
        }
        if let Error::Deadline { .. } = &self {
            body["hint"] = json!("Use POST /mapping/batch/async for long-running translations");
        }

        let mut response = (status, Json(body)).into_response();

        if let Error::RateLimited { retry_after, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Wrapper that renders an [`Error`] as a FHIR `OperationOutcome`.
///
/// Handlers on the `/fhir` router return this instead of the plain JSON
/// error payload so FHIR clients always see an OperationOutcome body.
#[derive(Debug)]
pub struct FhirError(pub Error);

impl From<Error> for FhirError {
    fn from(e: Error) -> Self {
        FhirError(e)
    }
}

impl IntoResponse for FhirError {
    fn into_response(self) -> Response {
        let status = self.0.status();

        let diagnostics = match &self.0 {
            Error::Database(_) => "Database temporarily unavailable".to_string(),
            Error::JobQueue(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self.0);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": status_to_fhir_code(status),
                "diagnostics": diagnostics,
            }]
        }));

        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json; charset=utf-8"),
        );
        response
    }
}

fn status_to_fhir_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid",
        StatusCode::NOT_FOUND => "not-found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::TOO_MANY_REQUESTS => "throttled",
        StatusCode::GATEWAY_TIMEOUT => "timeout",
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => "transient",
        _ => "exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            Error::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Deadline { deadline_ms: 25_000 }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::UpstreamModel("503".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::RateLimited {
                message: "slow down".into(),
                retry_after: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(Error::Validation("x".into()).label(), "validation");
        assert_eq!(Error::Deadline { deadline_ms: 1 }.label(), "mapping_timeout");
        assert_eq!(Error::Internal("x".into()).label(), "internal");
    }
}
