//! Target catalog repository (ICD-11 Traditional Medicine Module 2)
//!
//! Hosts the three retrieval primitives the candidate retriever layers:
//! vector similarity over the pgvector column, lexical full-text ranking,
//! and keyword containment scoring. All three return rows in nonincreasing
//! score order with ties broken by `code` ascending so candidate ordering
//! stays deterministic.

use crate::models::TargetCode;
use crate::{Error, Result};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str = "id, code, title, definition, category, parent_code, synonyms, \
     inclusions, exclusions, traditional_systems, embedding";

/// Target row with its retrieval score.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoredTarget {
    #[sqlx(flatten)]
    pub target: TargetCode,
    pub score: f64,
}

#[derive(Clone)]
pub struct TargetCodeRepository {
    pool: PgPool,
}

impl TargetCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Unique lookup by code (globally unique in the target catalog).
    pub async fn find(&self, code: &str) -> Result<Option<TargetCode>> {
        let row = sqlx::query_as::<_, TargetCode>(&format!(
            "SELECT {COLUMNS} FROM target_codes
             WHERE UPPER(code) = UPPER($1)
             LIMIT 1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    /// Cosine-similarity search over the embedding column. Rows without an
    /// embedding are excluded; rows below `min_similarity` are dropped.
    pub async fn search_by_vector(
        &self,
        query: &[f32],
        k: i64,
        min_similarity: f64,
    ) -> Result<Vec<ScoredTarget>> {
        let vector = Vector::from(query.to_vec());
        let rows = sqlx::query_as::<_, ScoredTarget>(&format!(
            "SELECT {COLUMNS}, (1 - (embedding <=> $1))::float8 AS score
             FROM target_codes
             WHERE embedding IS NOT NULL
               AND (1 - (embedding <=> $1)) >= $2
             ORDER BY embedding <=> $1 ASC, code ASC
             LIMIT $3"
        ))
        .bind(&vector)
        .bind(min_similarity)
        .bind(k)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }

    /// Lexical full-text ranking over title + definition.
    pub async fn search_fulltext(&self, query: &str, k: i64) -> Result<Vec<ScoredTarget>> {
        let rows = sqlx::query_as::<_, ScoredTarget>(&format!(
            "SELECT {COLUMNS},
                    ts_rank(to_tsvector('english', title || ' ' || COALESCE(definition, '')),
                            plainto_tsquery('english', $1))::float8 AS score
             FROM target_codes
             WHERE to_tsvector('english', title || ' ' || COALESCE(definition, ''))
                   @@ plainto_tsquery('english', $1)
             ORDER BY score DESC, code ASC
             LIMIT $2"
        ))
        .bind(query)
        .bind(k)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }

    /// Keyword containment scoring: fraction of keywords appearing
    /// (case-insensitively) in title or definition. Zero-score rows are
    /// dropped.
    pub async fn search_by_keywords(
        &self,
        keywords: &[String],
        k: i64,
    ) -> Result<Vec<ScoredTarget>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ScoredTarget>(&format!(
            "SELECT * FROM (
                 SELECT {COLUMNS},
                        (SELECT COUNT(*)::float8
                         FROM unnest($1::text[]) AS kw(word)
                         WHERE title ILIKE '%' || kw.word || '%'
                            OR COALESCE(definition, '') ILIKE '%' || kw.word || '%'
                        ) / $2 AS score
                 FROM target_codes
             ) scored
             WHERE score > 0
             ORDER BY score DESC, code ASC
             LIMIT $3"
        ))
        .bind(keywords)
        .bind(keywords.len() as f64)
        .bind(k)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }

    /// Substring autocomplete over code, title and synonyms.
    pub async fn autocomplete(&self, query: &str, limit: i64) -> Result<Vec<TargetCode>> {
        let pattern = format!("%{}%", query);
        let rows = sqlx::query_as::<_, TargetCode>(&format!(
            "SELECT {COLUMNS} FROM target_codes
             WHERE code ILIKE $1
                OR title ILIKE $1
                OR EXISTS (SELECT 1 FROM unnest(synonyms) s WHERE s ILIKE $1)
             ORDER BY code ASC
             LIMIT $2"
        ))
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }

    pub async fn set_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        sqlx::query(
            "UPDATE target_codes SET embedding = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Vector::from(embedding))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    pub async fn missing_embeddings(&self, limit: i64) -> Result<Vec<TargetCode>> {
        let rows = sqlx::query_as::<_, TargetCode>(&format!(
            "SELECT {COLUMNS} FROM target_codes
             WHERE embedding IS NULL
             ORDER BY created_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }

    /// `(total rows, rows with an embedding)`.
    pub async fn embedding_coverage(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(embedding) FROM target_codes",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM target_codes")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(count)
    }
}
