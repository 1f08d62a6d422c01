//! Translate orchestration
//!
//! The handler-facing service around the pipeline: resolved-mapping cache,
//! source lookup, the hard request deadline, persistence and cache
//! repopulation. UNMATCHED outcomes are returned but never persisted, so
//! the next identical request runs the pipeline again.

use crate::cache::CacheRegistry;
use crate::db::{MappingRepository, SourceCodeRepository};
use crate::models::{MappingListRow, MappingSource, SourceCode, SourceSystem, TargetCode};
use crate::services::jobs::JobItemRunner;
use crate::services::pipeline::{MappingPipeline, PipelineOutcome};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateOrigin {
    Cached,
    AiWorkflow,
}

impl TranslateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslateOrigin::Cached => "cached",
            TranslateOrigin::AiWorkflow => "ai_workflow",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    pub mapping: JsonValue,
    pub origin: TranslateOrigin,
    /// Provenance of the mapping row backing this answer; None when
    /// unmatched (nothing was persisted).
    pub mapping_source: Option<MappingSource>,
    pub matched: bool,
    pub processing_time_ms: u64,
}

pub struct TranslateService {
    sources: SourceCodeRepository,
    mappings: MappingRepository,
    caches: Arc<CacheRegistry>,
    pipeline: MappingPipeline,
    deadline: Duration,
}

impl TranslateService {
    pub fn new(
        sources: SourceCodeRepository,
        mappings: MappingRepository,
        caches: Arc<CacheRegistry>,
        pipeline: MappingPipeline,
        deadline_ms: u64,
    ) -> Self {
        Self {
            sources,
            mappings,
            caches,
            pipeline,
            deadline: Duration::from_millis(deadline_ms),
        }
    }

    /// Interactive translate: cache → persisted mapping → pipeline, bounded
    /// by the hard deadline. Nothing is persisted when the deadline fires.
    pub async fn translate(&self, code: &str, system: SourceSystem) -> Result<TranslateOutcome> {
        let started = Instant::now();
        let cache_key = (system.as_str().to_string(), code.to_uppercase());

        if let Some(cached) = self.caches.mappings.get(&cache_key) {
            let mapping_source = cached["mapping_source"]
                .as_str()
                .and_then(|s| s.parse().ok());
            return Ok(TranslateOutcome {
                mapping: cached,
                origin: TranslateOrigin::Cached,
                mapping_source,
                matched: true,
                processing_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        let source = self
            .sources
            .find(code, system)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Source code {code} not found in {system}")))?;

        // A mapping persisted by an earlier request (or a reviewer) short-
        // circuits the pipeline exactly like a cache hit.
        if let Some(existing) = self.mappings.find_for_source(code, system).await? {
            let mapping = mapping_row_json(&existing);
            self.caches.mappings.set(cache_key, mapping.clone());
            return Ok(TranslateOutcome {
                mapping,
                origin: TranslateOrigin::Cached,
                mapping_source: Some(existing.mapping_source),
                matched: true,
                processing_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        let outcome = tokio::time::timeout(self.deadline, self.pipeline.run(&source))
            .await
            .map_err(|_| Error::Deadline {
                deadline_ms: self.deadline.as_millis() as u64,
            })?;

        crate::metrics::PIPELINE_DURATION_SECONDS
            .with_label_values(&["interactive"])
            .observe(outcome.elapsed_ms as f64 / 1_000.0);

        let mapping = self.persist_and_render(&source, &outcome, &cache_key).await;
        Ok(TranslateOutcome {
            mapping,
            origin: TranslateOrigin::AiWorkflow,
            mapping_source: outcome.matched().then_some(MappingSource::AiValidated),
            matched: outcome.matched(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Persist a matched outcome and repopulate the mapping cache. A
    /// persistence failure is logged and swallowed: the caller still gets
    /// the adjudicated mapping, and the cache stays cold so the next call
    /// retries the whole pipeline.
    async fn persist_and_render(
        &self,
        source: &SourceCode,
        outcome: &PipelineOutcome,
        cache_key: &(String, String),
    ) -> JsonValue {
        let mapping = outcome_json(source, outcome);

        if let Some(target) = &outcome.target {
            match self
                .mappings
                .upsert(
                    source.id,
                    target.id,
                    outcome.equivalence,
                    outcome.confidence,
                    MappingSource::AiValidated,
                    &outcome.reasoning,
                )
                .await
            {
                Ok(_) => {
                    self.caches.mappings.invalidate(cache_key);
                    self.caches.mappings.set(cache_key.clone(), mapping.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        code = %source.code,
                        system = %source.system,
                        "Failed to persist mapping: {e}"
                    );
                }
            }
        }

        mapping
    }

    /// Synchronous batch: existing mappings only, no pipeline runs.
    pub async fn batch_lookup(
        &self,
        codes: &[(String, SourceSystem)],
    ) -> Result<Vec<JsonValue>> {
        let mut results = Vec::with_capacity(codes.len());
        for (code, system) in codes {
            let entry = match self.mappings.find_for_source(code, *system).await? {
                Some(row) => json!({
                    "code": code,
                    "system": system,
                    "matched": true,
                    "mapping": mapping_row_json(&row),
                }),
                None => json!({
                    "code": code,
                    "system": system,
                    "matched": false,
                    "mapping": null,
                }),
            };
            results.push(entry);
        }
        Ok(results)
    }
}

#[async_trait]
impl JobItemRunner for TranslateService {
    async fn run_item(
        &self,
        code: &str,
        system: SourceSystem,
        save_results: bool,
    ) -> std::result::Result<JsonValue, String> {
        let source = match self.sources.find(code, system).await {
            Ok(Some(source)) => source,
            Ok(None) => return Err("code not found".to_string()),
            Err(e) => return Err(format!("lookup failed: {e}")),
        };

        let outcome = self.pipeline.run(&source).await;
        crate::metrics::PIPELINE_DURATION_SECONDS
            .with_label_values(&["batch"])
            .observe(outcome.elapsed_ms as f64 / 1_000.0);

        let cache_key = (system.as_str().to_string(), code.to_uppercase());
        let mapping = if save_results {
            self.persist_and_render(&source, &outcome, &cache_key).await
        } else {
            outcome_json(&source, &outcome)
        };

        Ok(mapping)
    }
}

/// Response shape shared by the interactive endpoint, batch items and the
/// mapping cache.
fn outcome_json(source: &SourceCode, outcome: &PipelineOutcome) -> JsonValue {
    let mut value = json!({
        "source": source_json(source),
        "target": outcome.target.as_ref().map(target_json),
        "equivalence": outcome.equivalence,
        "confidence": outcome.confidence,
        "reasoning": outcome.reasoning,
    });
    if outcome.matched() {
        value["mapping_source"] = json!(MappingSource::AiValidated);
    }
    value
}

fn source_json(source: &SourceCode) -> JsonValue {
    let mut value = json!({
        "code": source.code,
        "system": source.system,
        "term": source.term,
    });
    if let Some(english) = &source.english_name {
        value["english_name"] = json!(english);
    }
    value
}

fn target_json(target: &TargetCode) -> JsonValue {
    json!({
        "code": target.code,
        "title": target.title,
    })
}

/// Same shape, built from a persisted row.
pub fn mapping_row_json(row: &MappingListRow) -> JsonValue {
    let mut source = json!({
        "code": row.source_code,
        "system": row.source_system,
        "term": row.source_term,
    });
    if let Some(english) = &row.source_english_name {
        source["english_name"] = json!(english);
    }
    json!({
        "source": source,
        "target": {
            "code": row.target_code,
            "title": row.target_title,
        },
        "equivalence": row.equivalence,
        "confidence": row.confidence,
        "reasoning": row.reasoning,
        "mapping_source": row.mapping_source,
    })
}
