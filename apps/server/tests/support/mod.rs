//! Shared test harness
//!
//! Builds the full router over a lazy (never-connected) database pool and
//! stub model clients, so HTTP-surface behavior (validation, rate
//! limiting, routing, headers, the in-memory job registry) is exercised
//! without Postgres or network access. Queries that do reach the pool fail
//! like a database outage, which is itself part of the error contract.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use setu::api::create_router;
use setu::models::{Candidate, SourceCode};
use setu::ratelimit::RateLimiter;
use setu::services::adjudicator::{Adjudication, Adjudicator};
use setu::services::embedding::Embedder;
use setu::state::{AppState, AppStateOptions};
use setu::{Config, Error};
use std::sync::Arc;
use tower::ServiceExt as _;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// Embedder stub: fixed unit-length vector, no network.
pub struct StubEmbedder;

#[async_trait::async_trait]
impl Embedder for StubEmbedder {
    async fn embed_query(&self, _text: &str) -> setu::Result<Vec<f32>> {
        Ok(vec![0.036; 768])
    }

    async fn embed_document(&self, _text: &str) -> setu::Result<Vec<f32>> {
        Ok(vec![0.036; 768])
    }

    async fn embed_documents(&self, texts: &[String]) -> setu::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.036; 768]).collect())
    }
}

/// Adjudicator stub that always fails; the pipeline's fallback covers it.
pub struct StubAdjudicator;

#[async_trait::async_trait]
impl Adjudicator for StubAdjudicator {
    async fn adjudicate(
        &self,
        _source: &SourceCode,
        _candidates: &[Candidate],
    ) -> setu::Result<Adjudication> {
        Err(Error::UpstreamModel("stubbed out".into()))
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}, None).await
    }

    pub async fn with_config(
        configure: impl FnOnce(&mut Config),
        rate_limiter: Option<RateLimiter>,
    ) -> Self {
        let mut config = Config::load().expect("load default config");
        config.jobs.item_delay_ms = 0;
        configure(&mut config);

        let state = AppState::new_with_options(
            config,
            AppStateOptions {
                run_migrations: false,
                lazy_pool: true,
                embedder: Some(Arc::new(StubEmbedder)),
                adjudicator: Some(Arc::new(StubAdjudicator)),
                rate_limiter,
            },
        )
        .await
        .expect("initialize AppState");

        let router = create_router(state.clone());
        Self { router, state }
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        self.request_with_headers(method, path_and_query, body, &[])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "example.org")
            .header("content-type", "application/json")
            .body(match &body {
                Some(value) => Body::from(value.to_string()),
                None => Body::empty(),
            })
            .expect("build request");

        for (name, value) in extra_headers {
            request.headers_mut().insert(
                name.parse::<HeaderName>().expect("header name"),
                value.parse::<HeaderValue>().expect("header value"),
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes: Bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };

        (status, headers, json)
    }

    /// Raw-body variant for non-JSON endpoints (`/metrics`).
    pub async fn request_text(&self, method: Method, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "example.org")
            .body(Body::empty())
            .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }
}
