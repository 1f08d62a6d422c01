//! Candidate retrieval
//!
//! Staged retrieval over the target catalog: vector similarity first (the
//! cross-script source terms rarely share tokens with English titles), then
//! lexical full-text, then keyword containment. Each stage only runs when
//! the previous one produced nothing, so progress is guaranteed even with
//! no embeddings loaded; only quality degrades.

use crate::db::target_codes::{ScoredTarget, TargetCodeRepository};
use crate::models::{Candidate, RetrievalOrigin};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Keyword-path fetch size; the cruder ranker gets a wider net before the
/// list is truncated to `max_candidates`.
const KEYWORD_FETCH: i64 = 15;

const STOP_WORDS: [&str; 9] = [
    "the", "and", "for", "with", "from", "that", "this", "disorder", "disease",
];

/// Search primitives the retriever layers. Implemented by the target
/// repository; mocked in pipeline tests.
#[async_trait]
pub trait TargetSearch: Send + Sync {
    async fn by_vector(
        &self,
        query: &[f32],
        k: i64,
        min_similarity: f64,
    ) -> Result<Vec<ScoredTarget>>;

    async fn by_fulltext(&self, query: &str, k: i64) -> Result<Vec<ScoredTarget>>;

    async fn by_keywords(&self, keywords: &[String], k: i64) -> Result<Vec<ScoredTarget>>;
}

#[async_trait]
impl TargetSearch for TargetCodeRepository {
    async fn by_vector(
        &self,
        query: &[f32],
        k: i64,
        min_similarity: f64,
    ) -> Result<Vec<ScoredTarget>> {
        self.search_by_vector(query, k, min_similarity).await
    }

    async fn by_fulltext(&self, query: &str, k: i64) -> Result<Vec<ScoredTarget>> {
        self.search_fulltext(query, k).await
    }

    async fn by_keywords(&self, keywords: &[String], k: i64) -> Result<Vec<ScoredTarget>> {
        self.search_by_keywords(keywords, k).await
    }
}

/// Ranked candidates plus any soft failures hit along the way.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    pub candidates: Vec<Candidate>,
    pub errors: Vec<String>,
}

pub struct CandidateRetriever {
    search: Arc<dyn TargetSearch>,
    max_candidates: usize,
    min_similarity: f64,
}

impl CandidateRetriever {
    pub fn new(search: Arc<dyn TargetSearch>, max_candidates: usize, min_similarity: f64) -> Self {
        Self {
            search,
            max_candidates,
            min_similarity,
        }
    }

    /// Retrieve up to `max_candidates` ranked targets for a preprocessed
    /// source description. A stage failure is recorded and the next stage
    /// runs; only an empty result from every stage yields no candidates.
    pub async fn retrieve(&self, text: &str, embedding: Option<&[f32]>) -> RetrievalOutcome {
        let mut outcome = RetrievalOutcome::default();
        let k = self.max_candidates as i64;

        if let Some(vector) = embedding.filter(|v| !v.is_empty()) {
            match self.search.by_vector(vector, k, self.min_similarity).await {
                Ok(hits) if !hits.is_empty() => {
                    outcome.candidates = to_candidates(hits, RetrievalOrigin::Vector);
                    return outcome;
                }
                Ok(_) => {}
                Err(e) => outcome.errors.push(format!("Vector search failed: {e}")),
            }
        }

        match self.search.by_fulltext(text, k).await {
            Ok(hits) if !hits.is_empty() => {
                outcome.candidates = to_candidates(hits, RetrievalOrigin::FullText);
                return outcome;
            }
            Ok(_) => {}
            Err(e) => outcome.errors.push(format!("Full-text search failed: {e}")),
        }

        let keywords = derive_keywords(text);
        if keywords.is_empty() {
            return outcome;
        }

        match self.search.by_keywords(&keywords, KEYWORD_FETCH).await {
            Ok(mut hits) => {
                hits.truncate(self.max_candidates);
                outcome.candidates = to_candidates(hits, RetrievalOrigin::Keyword);
            }
            Err(e) => outcome.errors.push(format!("Keyword search failed: {e}")),
        }

        outcome
    }
}

fn to_candidates(hits: Vec<ScoredTarget>, origin: RetrievalOrigin) -> Vec<Candidate> {
    hits.into_iter()
        .map(|hit| Candidate {
            target: hit.target,
            score: hit.score,
            origin,
        })
        .collect()
}

/// Split on whitespace, `-` and `|`, lowercase, drop short tokens and stop
/// words, keep the first five.
pub fn derive_keywords(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '-' || c == '|')
        .map(|token| token.to_lowercase())
        .filter(|token| token.len() > 3)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .take(5)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetCode;
    use crate::Error;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn scored(code: &str, score: f64) -> ScoredTarget {
        ScoredTarget {
            target: TargetCode {
                id: Uuid::new_v4(),
                code: code.to_string(),
                title: format!("Title for {code}"),
                definition: None,
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

    /// Scripted search backend recording which stages ran.
    struct ScriptedSearch {
        vector: Result<Vec<ScoredTarget>>,
        fulltext: Result<Vec<ScoredTarget>>,
        keywords: Result<Vec<ScoredTarget>>,
        stages: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl TargetSearch for ScriptedSearch {
        async fn by_vector(
            &self,
            _query: &[f32],
            _k: i64,
            _min_similarity: f64,
        ) -> Result<Vec<ScoredTarget>> {
            self.stages.lock().unwrap().push("vector");
            clone_result(&self.vector)
        }

        async fn by_fulltext(&self, _query: &str, _k: i64) -> Result<Vec<ScoredTarget>> {
            self.stages.lock().unwrap().push("fulltext");
            clone_result(&self.fulltext)
        }

        async fn by_keywords(&self, _keywords: &[String], _k: i64) -> Result<Vec<ScoredTarget>> {
            self.stages.lock().unwrap().push("keywords");
            clone_result(&self.keywords)
        }
    }

    fn clone_result(r: &Result<Vec<ScoredTarget>>) -> Result<Vec<ScoredTarget>> {
        match r {
            Ok(hits) => Ok(hits.clone()),
            Err(_) => Err(Error::Internal("scripted failure".into())),
        }
    }

    #[tokio::test]
    async fn vector_hits_short_circuit() {
        let search = Arc::new(ScriptedSearch {
            vector: Ok(vec![scored("SK00.0", 0.92)]),
            fulltext: Ok(vec![scored("SK99", 0.1)]),
            keywords: Ok(vec![]),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search.clone(), 10, 0.5);

        let outcome = retriever.retrieve("wind disorder", Some(&[0.1; 768])).await;
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].origin, RetrievalOrigin::Vector);
        assert_eq!(*search.stages.lock().unwrap(), vec!["vector"]);
    }

    #[tokio::test]
    async fn empty_vector_falls_to_fulltext() {
        let search = Arc::new(ScriptedSearch {
            vector: Ok(vec![]),
            fulltext: Ok(vec![scored("SK10", 0.4)]),
            keywords: Ok(vec![]),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search.clone(), 10, 0.5);

        let outcome = retriever.retrieve("wind disorder", Some(&[0.1; 768])).await;
        assert_eq!(outcome.candidates[0].origin, RetrievalOrigin::FullText);
        assert_eq!(*search.stages.lock().unwrap(), vec!["vector", "fulltext"]);
    }

    #[tokio::test]
    async fn missing_embedding_skips_vector_stage() {
        let search = Arc::new(ScriptedSearch {
            vector: Ok(vec![scored("SK00.0", 0.92)]),
            fulltext: Ok(vec![scored("SK10", 0.4)]),
            keywords: Ok(vec![]),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search.clone(), 10, 0.5);

        let outcome = retriever.retrieve("wind disorder", None).await;
        assert_eq!(outcome.candidates[0].origin, RetrievalOrigin::FullText);
        assert_eq!(*search.stages.lock().unwrap(), vec!["fulltext"]);
    }

    #[tokio::test]
    async fn keyword_fallback_truncates_to_max() {
        let hits: Vec<ScoredTarget> = (0..15)
            .map(|i| scored(&format!("SK{i:02}"), 1.0 - i as f64 * 0.05))
            .collect();
        let search = Arc::new(ScriptedSearch {
            vector: Ok(vec![]),
            fulltext: Ok(vec![]),
            keywords: Ok(hits),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search, 10, 0.5);

        let outcome = retriever
            .retrieve("chronic respiratory obstruction pattern", None)
            .await;
        assert_eq!(outcome.candidates.len(), 10);
        assert_eq!(outcome.candidates[0].origin, RetrievalOrigin::Keyword);
    }

    #[tokio::test]
    async fn stage_failures_are_soft() {
        let search = Arc::new(ScriptedSearch {
            vector: Err(Error::Internal("down".into())),
            fulltext: Err(Error::Internal("down".into())),
            keywords: Ok(vec![scored("SK42", 0.4)]),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search, 10, 0.5);

        let outcome = retriever
            .retrieve("chronic respiratory obstruction", Some(&[0.1; 768]))
            .await;
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.errors.len(), 2);
    }

    #[tokio::test]
    async fn no_keywords_means_no_candidates() {
        let search = Arc::new(ScriptedSearch {
            vector: Ok(vec![]),
            fulltext: Ok(vec![]),
            keywords: Ok(vec![scored("SK42", 0.4)]),
            stages: Mutex::new(vec![]),
        });
        let retriever = CandidateRetriever::new(search.clone(), 10, 0.5);

        // Every token is short or a stop word, so stage three never runs.
        let outcome = retriever.retrieve("the and for", None).await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(*search.stages.lock().unwrap(), vec!["fulltext"]);
    }

    #[test]
    fn keyword_derivation_rules() {
        let keywords = derive_keywords(
            "Chronic wind-bile disorder of the joints | with swelling from cold",
        );
        assert_eq!(
            keywords,
            vec!["chronic", "wind", "bile", "joints", "swelling"]
        );

        assert!(derive_keywords("the and for with").is_empty());
        assert_eq!(derive_keywords("disorder disease"), Vec::<String>::new());
    }

    #[test]
    fn keyword_derivation_is_deterministic() {
        let a = derive_keywords("vata kapha imbalance affecting digestion badly");
        let b = derive_keywords("vata kapha imbalance affecting digestion badly");
        assert_eq!(a, b);
    }
}
