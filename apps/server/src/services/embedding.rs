//! Text embedding via the Gemini embedContent API
//!
//! Query and document task modes share one vector space (768 dims) and are
//! comparable with cosine similarity. The pipeline collapses every failure
//! mode here (rate-limit reject, timeout, malformed body) into a single
//! embed-failure kind.

use crate::cache::{embedding_key, CacheRegistry};
use crate::config::ModelsConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed text tuned for "this is a search query".
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed text tuned for "this is to be indexed".
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batched document embedding; preserves input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl GeminiEmbedder {
    pub fn new(config: &ModelsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.embed_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            dim: config.embedding_dim,
        }
    }

    fn request_body(&self, text: &str, task_type: &str) -> serde_json::Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
            "outputDimensionality": self.dim,
        })
    }

    async fn embed(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.api_base, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(text, task_type))
            .send()
            .await
            .map_err(|e| Error::UpstreamModel(format!("embedContent request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamModel(format!(
                "embedContent returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamModel(format!("embedContent body unreadable: {e}")))?;

        parse_values(body.get("embedding"), self.dim)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, "RETRIEVAL_QUERY").await
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.api_base, self.model, self.api_key
        );
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| self.request_body(t, "RETRIEVAL_DOCUMENT"))
            .collect();

        let response = self
            .client
            .post(&url)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| Error::UpstreamModel(format!("batchEmbedContents request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamModel(format!(
                "batchEmbedContents returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            Error::UpstreamModel(format!("batchEmbedContents body unreadable: {e}"))
        })?;

        let embeddings = body
            .get("embeddings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::UpstreamModel("batchEmbedContents response missing embeddings".into())
            })?;

        if embeddings.len() != texts.len() {
            return Err(Error::UpstreamModel(format!(
                "batchEmbedContents returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }

        embeddings
            .iter()
            .map(|e| parse_values(Some(e), self.dim))
            .collect()
    }
}

fn parse_values(embedding: Option<&serde_json::Value>, dim: usize) -> Result<Vec<f32>> {
    let values = embedding
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::UpstreamModel("embedding response missing values".into()))?;

    let vector: Vec<f32> = values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if vector.len() != dim {
        return Err(Error::UpstreamModel(format!(
            "expected {dim}-dim embedding, got {}",
            vector.len()
        )));
    }

    Ok(vector)
}

/// Embedder wrapper that serves query embeddings from the `embeddings`
/// cache. Document embeddings are one-shot loader traffic and bypass it.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    caches: Arc<CacheRegistry>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, caches: Arc<CacheRegistry>) -> Self {
        Self { inner, caches }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let key = embedding_key(text);
        if let Some(cached) = self.caches.embeddings.get(&key) {
            return Ok(cached);
        }
        let vector = self.inner.embed_query(text).await?;
        self.caches.embeddings.set(key, vector.clone());
        Ok(vector)
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_document(text).await
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_documents(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_caches() -> Arc<CacheRegistry> {
        Arc::new(CacheRegistry::new(&CacheConfig {
            mappings_capacity: 10,
            mappings_ttl_secs: 60,
            embeddings_capacity: 10,
            embeddings_ttl_secs: 60,
            search_capacity: 10,
            search_ttl_secs: 60,
            fhir_capacity: 10,
            fhir_ttl_secs: 60,
        }))
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; 768])
        }

        async fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5; 768])
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 768]).collect())
        }
    }

    #[tokio::test]
    async fn cached_embedder_hits_on_repeat_query() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), test_caches());

        cached.embed_query("vata imbalance disorder").await.unwrap();
        cached.embed_query("vata imbalance disorder").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn long_texts_share_a_key_after_truncation() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), test_caches());

        let prefix = "p".repeat(100);
        cached
            .embed_query(&format!("{prefix} tail one"))
            .await
            .unwrap();
        cached
            .embed_query(&format!("{prefix} tail two"))
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_values_rejects_wrong_dimension() {
        let body = serde_json::json!({ "values": [0.1, 0.2, 0.3] });
        assert!(parse_values(Some(&body), 768).is_err());
    }
}
