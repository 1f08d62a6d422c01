//! Mapping pipeline
//!
//! Linear state machine over one source code:
//! normalize → embed → search → route → (high-confidence accept | adjudicate
//! | unmatched). Non-fatal failures accumulate in `errors` and the run
//! continues on a degraded path; the pipeline itself never returns an error.
//! Persistence and the request deadline live in the translate service, not
//! here.

use crate::config::PipelineConfig;
use crate::models::{Candidate, Equivalence, SourceCode, TargetCode};
use crate::services::adjudicator::Adjudicator;
use crate::services::embedding::Embedder;
use crate::services::retriever::CandidateRetriever;
use std::sync::Arc;
use std::time::Instant;

/// Number of candidates handed to the adjudicator.
const ADJUDICATION_CANDIDATES: usize = 3;

const FALLBACK_CONFIDENCE: f64 = 0.5;
const HIGH_CONF_FLOOR: f64 = 0.85;

/// Terminal result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub target: Option<TargetCode>,
    pub equivalence: Equivalence,
    pub confidence: f64,
    pub reasoning: String,
    /// Whether the LLM adjudicator was consulted.
    pub adjudicated: bool,
    pub candidates_considered: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

impl PipelineOutcome {
    pub fn matched(&self) -> bool {
        self.target.is_some()
    }
}

pub struct MappingPipeline {
    embedder: Arc<dyn Embedder>,
    adjudicator: Arc<dyn Adjudicator>,
    retriever: CandidateRetriever,
    config: PipelineConfig,
}

impl MappingPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        adjudicator: Arc<dyn Adjudicator>,
        retriever: CandidateRetriever,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            adjudicator,
            retriever,
            config,
        }
    }

    pub async fn run(&self, source: &SourceCode) -> PipelineOutcome {
        let started = Instant::now();
        let mut errors = Vec::new();

        // Normalize. An empty description still proceeds so retrieval can
        // fall back to the code itself.
        let normalized = normalize(source);
        if normalized.is_empty() {
            errors.push("No text available for matching".to_string());
        }
        let search_text = if normalized.is_empty() {
            source.code.to_lowercase()
        } else {
            normalized.clone()
        };

        // Embed. Failure degrades to lexical retrieval.
        let embedding = match self.embedder.embed_query(&search_text).await {
            Ok(vector) => vector,
            Err(e) => {
                errors.push(format!("Embedding failed: {e}"));
                Vec::new()
            }
        };

        // Search.
        let retrieval = self
            .retriever
            .retrieve(&search_text, Some(&embedding))
            .await;
        errors.extend(retrieval.errors);
        let candidates = retrieval.candidates;

        // Route.
        let Some(top) = candidates.first() else {
            crate::metrics::PIPELINE_OUTCOMES
                .with_label_values(&["unmatched"])
                .inc();
            return PipelineOutcome {
                target: None,
                equivalence: Equivalence::Unmatched,
                confidence: 0.0,
                reasoning: "No candidates".to_string(),
                adjudicated: false,
                candidates_considered: 0,
                errors,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        };

        if top.score > self.config.high_confidence_threshold {
            crate::metrics::PIPELINE_OUTCOMES
                .with_label_values(&["high_confidence"])
                .inc();
            return PipelineOutcome {
                target: Some(top.target.clone()),
                equivalence: Equivalence::Equivalent,
                confidence: top.score.max(HIGH_CONF_FLOOR),
                reasoning: "High confidence text match".to_string(),
                adjudicated: false,
                candidates_considered: candidates.len(),
                errors,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        // Adjudicate over the top three.
        let shortlist = &candidates[..candidates.len().min(ADJUDICATION_CANDIDATES)];
        let outcome = match self.adjudicator.adjudicate(source, shortlist).await {
            Ok(judgment) => match judgment.selected_code {
                Some(code) => {
                    match shortlist
                        .iter()
                        .find(|c| c.target.code.eq_ignore_ascii_case(&code))
                    {
                        Some(chosen) => {
                            crate::metrics::PIPELINE_OUTCOMES
                                .with_label_values(&["adjudicated"])
                                .inc();
                            PipelineOutcome {
                                target: Some(chosen.target.clone()),
                                equivalence: judgment.equivalence,
                                confidence: judgment.confidence,
                                reasoning: judgment.reasoning,
                                adjudicated: true,
                                candidates_considered: candidates.len(),
                                errors: errors.clone(),
                                elapsed_ms: 0,
                            }
                        }
                        None => {
                            // The model invented a code; treat as failure.
                            errors.push(format!(
                                "Adjudicator selected unknown code '{code}'"
                            ));
                            fallback_outcome(top, candidates.len(), errors.clone())
                        }
                    }
                }
                None => {
                    crate::metrics::PIPELINE_OUTCOMES
                        .with_label_values(&["unmatched"])
                        .inc();
                    PipelineOutcome {
                        target: None,
                        equivalence: Equivalence::Unmatched,
                        confidence: 0.0,
                        reasoning: if judgment.reasoning.is_empty() {
                            "No suitable candidate".to_string()
                        } else {
                            judgment.reasoning
                        },
                        adjudicated: true,
                        candidates_considered: candidates.len(),
                        errors: errors.clone(),
                        elapsed_ms: 0,
                    }
                }
            },
            Err(e) => {
                errors.push(format!("AI validation failed: {e}"));
                fallback_outcome(top, candidates.len(), errors.clone())
            }
        };

        PipelineOutcome {
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..outcome
        }
    }
}

fn fallback_outcome(
    top: &Candidate,
    candidates_considered: usize,
    errors: Vec<String>,
) -> PipelineOutcome {
    crate::metrics::PIPELINE_OUTCOMES
        .with_label_values(&["fallback"])
        .inc();
    PipelineOutcome {
        target: Some(top.target.clone()),
        equivalence: Equivalence::Inexact,
        confidence: FALLBACK_CONFIDENCE,
        reasoning: "AI validation failed; using top search result".to_string(),
        adjudicated: true,
        candidates_considered,
        errors,
        elapsed_ms: 0,
    }
}

/// Lowercased, trimmed join of the non-empty description fields, in
/// preference order. Empty when the row carries no usable text.
pub fn normalize(source: &SourceCode) -> String {
    [
        source.short_definition.as_deref(),
        source.english_name.as_deref(),
        source.long_definition.as_deref(),
        Some(source.term.as_str()),
        source.term_normalized.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::target_codes::ScoredTarget;
    use crate::models::{RetrievalOrigin, SourceSystem};
    use crate::services::adjudicator::{Adjudication, Adjudicator};
    use crate::services::retriever::TargetSearch;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use uuid::Uuid;

    fn source(code: &str) -> SourceCode {
        SourceCode {
            id: Uuid::new_v4(),
            code: code.to_string(),
            system: SourceSystem::Ayurveda,
            term: "vātaroga".to_string(),
            term_normalized: Some("vataroga".to_string()),
            native_script: None,
            short_definition: Some("Wind disorder of the joints".to_string()),
            long_definition: None,
            english_name: Some("Wind disorder".to_string()),
            searchable_text: None,
            embedding: None,
        }
    }

    fn empty_source() -> SourceCode {
        SourceCode {
            id: Uuid::new_v4(),
            code: "AAA-9".to_string(),
            system: SourceSystem::Siddha,
            term: String::new(),
            term_normalized: None,
            native_script: None,
            short_definition: None,
            long_definition: None,
            english_name: None,
            searchable_text: None,
            embedding: None,
        }
    }

    fn scored(code: &str, score: f64) -> ScoredTarget {
        ScoredTarget {
            target: TargetCode {
                id: Uuid::new_v4(),
                code: code.to_string(),
                title: format!("Title {code}"),
                definition: Some("definition".to_string()),
                category: None,
                parent_code: None,
                synonyms: vec![],
                inclusions: vec![],
                exclusions: vec![],
                traditional_systems: vec![],
                embedding: None,
            },
            score,
        }
    }

    struct FixedSearch {
        vector: Vec<ScoredTarget>,
    }

    #[async_trait]
    impl TargetSearch for FixedSearch {
        async fn by_vector(
            &self,
            _query: &[f32],
            _k: i64,
            _min: f64,
        ) -> Result<Vec<ScoredTarget>> {
            Ok(self.vector.clone())
        }

        async fn by_fulltext(&self, _query: &str, _k: i64) -> Result<Vec<ScoredTarget>> {
            Ok(vec![])
        }

        async fn by_keywords(&self, _keywords: &[String], _k: i64) -> Result<Vec<ScoredTarget>> {
            Ok(vec![])
        }
    }

    struct OkEmbedder;

    #[async_trait]
    impl Embedder for OkEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1; 768])
        }

        async fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1; 768])
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1; 768]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::UpstreamModel("quota exhausted".into()))
        }

        async fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::UpstreamModel("quota exhausted".into()))
        }

        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::UpstreamModel("quota exhausted".into()))
        }
    }

    enum Script {
        Select { index: usize, confidence: f64 },
        InventCode,
        NoMatch,
        Fail,
        Panic,
    }

    struct ScriptedAdjudicator(Script);

    #[async_trait]
    impl Adjudicator for ScriptedAdjudicator {
        async fn adjudicate(
            &self,
            _source: &SourceCode,
            candidates: &[Candidate],
        ) -> Result<Adjudication> {
            match &self.0 {
                Script::Select { index, confidence } => Ok(Adjudication {
                    selected_code: Some(candidates[*index].target.code.clone()),
                    confidence: *confidence,
                    equivalence: Equivalence::Narrower,
                    reasoning: "Second candidate is the narrower concept".to_string(),
                }),
                Script::InventCode => Ok(Adjudication {
                    selected_code: Some("ZZ99.9".to_string()),
                    confidence: 0.9,
                    equivalence: Equivalence::Equivalent,
                    reasoning: "made up".to_string(),
                }),
                Script::NoMatch => Ok(Adjudication {
                    selected_code: None,
                    confidence: 0.1,
                    equivalence: Equivalence::Unmatched,
                    reasoning: "nothing fits".to_string(),
                }),
                Script::Fail => Err(Error::UpstreamModel("no parseable JSON".into())),
                Script::Panic => panic!("adjudicator must not be called"),
            }
        }
    }

    fn pipeline(
        embedder: Arc<dyn Embedder>,
        script: Script,
        vector_hits: Vec<ScoredTarget>,
    ) -> MappingPipeline {
        let search = Arc::new(FixedSearch {
            vector: vector_hits,
        });
        MappingPipeline::new(
            embedder,
            Arc::new(ScriptedAdjudicator(script)),
            CandidateRetriever::new(search, 10, 0.5),
            PipelineConfig {
                request_deadline_ms: 25_000,
                high_confidence_threshold: 0.9,
                min_vector_similarity: 0.5,
                max_candidates: 10,
            },
        )
    }

    #[tokio::test]
    async fn high_confidence_bypasses_adjudicator() {
        let p = pipeline(
            Arc::new(OkEmbedder),
            Script::Panic,
            vec![scored("SK00.0", 0.95), scored("SK01.1", 0.6)],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert_eq!(outcome.target.as_ref().unwrap().code, "SK00.0");
        assert_eq!(outcome.equivalence, Equivalence::Equivalent);
        assert!(outcome.confidence >= 0.85);
        assert_eq!(outcome.reasoning, "High confidence text match");
        assert!(!outcome.adjudicated);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn adjudicator_choice_is_honored() {
        let p = pipeline(
            Arc::new(OkEmbedder),
            Script::Select {
                index: 1,
                confidence: 0.78,
            },
            vec![
                scored("SK00.0", 0.55),
                scored("SK01.1", 0.52),
                scored("SK02.2", 0.51),
            ],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert_eq!(outcome.target.as_ref().unwrap().code, "SK01.1");
        assert_eq!(outcome.equivalence, Equivalence::Narrower);
        assert!((outcome.confidence - 0.78).abs() < 1e-9);
        assert!(outcome.adjudicated);
    }

    #[tokio::test]
    async fn invented_code_falls_back_to_top_candidate() {
        let p = pipeline(
            Arc::new(OkEmbedder),
            Script::InventCode,
            vec![
                scored("SK00.0", 0.55),
                scored("SK01.1", 0.52),
                scored("SK02.2", 0.51),
            ],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert_eq!(outcome.target.as_ref().unwrap().code, "SK00.0");
        assert_eq!(outcome.equivalence, Equivalence::Inexact);
        assert!((outcome.confidence - 0.5).abs() < 1e-9);
        assert!(outcome.reasoning.contains("AI validation failed"));
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("unknown code 'ZZ99.9'")));
    }

    #[tokio::test]
    async fn adjudicator_failure_falls_back() {
        let p = pipeline(
            Arc::new(OkEmbedder),
            Script::Fail,
            vec![scored("SK00.0", 0.55)],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert_eq!(outcome.target.as_ref().unwrap().code, "SK00.0");
        assert_eq!(outcome.equivalence, Equivalence::Inexact);
        assert!((outcome.confidence - 0.5).abs() < 1e-9);
        assert!(!outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn no_candidates_is_unmatched_without_llm_call() {
        let p = pipeline(Arc::new(OkEmbedder), Script::Panic, vec![]);
        let outcome = p.run(&source("AAA-1")).await;

        assert!(outcome.target.is_none());
        assert_eq!(outcome.equivalence, Equivalence::Unmatched);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.reasoning, "No candidates");
        assert!(!outcome.adjudicated);
    }

    #[tokio::test]
    async fn adjudicator_no_match_is_unmatched() {
        let p = pipeline(
            Arc::new(OkEmbedder),
            Script::NoMatch,
            vec![scored("SK00.0", 0.55)],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert!(outcome.target.is_none());
        assert_eq!(outcome.equivalence, Equivalence::Unmatched);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.reasoning, "nothing fits");
    }

    #[tokio::test]
    async fn embed_failure_degrades_and_records_error() {
        // Vector hits exist but cannot be reached without an embedding;
        // fulltext/keyword are empty, so the run ends unmatched.
        let p = pipeline(
            Arc::new(FailingEmbedder),
            Script::Panic,
            vec![scored("SK00.0", 0.95)],
        );
        let outcome = p.run(&source("AAA-1")).await;

        assert!(outcome.target.is_none());
        assert!(outcome.errors.iter().any(|e| e.contains("Embedding failed")));
    }

    #[tokio::test]
    async fn empty_source_text_records_error_and_completes() {
        let p = pipeline(Arc::new(OkEmbedder), Script::Panic, vec![]);
        let outcome = p.run(&empty_source()).await;

        assert!(outcome.target.is_none());
        assert_eq!(outcome.equivalence, Equivalence::Unmatched);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("No text available")));
    }

    #[test]
    fn normalize_joins_nonempty_fields() {
        let s = source("AAA-1");
        assert_eq!(
            normalize(&s),
            "wind disorder of the joints wind disorder vātaroga vataroga"
        );
        assert_eq!(normalize(&empty_source()), "");
    }
}
