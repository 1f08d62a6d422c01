//! Source catalog repository (NAMASTE Ayurveda/Siddha/Unani codes)

use crate::models::{SourceCode, SourceSystem};
use crate::{Error, Result};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str = "id, code, system, term, term_normalized, native_script, \
     short_definition, long_definition, english_name, searchable_text, embedding";

#[derive(Clone)]
pub struct SourceCodeRepository {
    pool: PgPool,
}

impl SourceCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Unique lookup by `(code, system)`. Codes compare case-insensitively.
    pub async fn find(&self, code: &str, system: SourceSystem) -> Result<Option<SourceCode>> {
        let row = sqlx::query_as::<_, SourceCode>(&format!(
            "SELECT {COLUMNS} FROM source_codes
             WHERE UPPER(code) = UPPER($1) AND system = $2
             LIMIT 1"
        ))
        .bind(code)
        .bind(system.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    /// Substring autocomplete over term, english name and searchable text.
    pub async fn autocomplete(
        &self,
        query: &str,
        system: Option<SourceSystem>,
        limit: i64,
    ) -> Result<Vec<SourceCode>> {
        let pattern = format!("%{}%", query);
        let rows = if let Some(system) = system {
            sqlx::query_as::<_, SourceCode>(&format!(
                "SELECT {COLUMNS} FROM source_codes
                 WHERE system = $2
                   AND (term ILIKE $1
                        OR english_name ILIKE $1
                        OR searchable_text ILIKE $1
                        OR code ILIKE $1)
                 ORDER BY code ASC
                 LIMIT $3"
            ))
            .bind(&pattern)
            .bind(system.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, SourceCode>(&format!(
                "SELECT {COLUMNS} FROM source_codes
                 WHERE term ILIKE $1
                    OR english_name ILIKE $1
                    OR searchable_text ILIKE $1
                    OR code ILIKE $1
                 ORDER BY code ASC
                 LIMIT $2"
            ))
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(Error::Database)?;

        Ok(rows)
    }

    /// Paginated listing with substring filter, backing `ValueSet/$expand`.
    pub async fn expand(
        &self,
        filter: Option<&str>,
        system: Option<SourceSystem>,
        count: i64,
        offset: i64,
    ) -> Result<(i64, Vec<SourceCode>)> {
        let pattern = filter.map(|f| format!("%{}%", f));
        let system_str = system.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM source_codes
             WHERE ($1::text IS NULL
                    OR term ILIKE $1 OR english_name ILIKE $1 OR searchable_text ILIKE $1)
               AND ($2::text IS NULL OR system = $2)",
        )
        .bind(&pattern)
        .bind(system_str)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let rows = sqlx::query_as::<_, SourceCode>(&format!(
            "SELECT {COLUMNS} FROM source_codes
             WHERE ($1::text IS NULL
                    OR term ILIKE $1 OR english_name ILIKE $1 OR searchable_text ILIKE $1)
               AND ($2::text IS NULL OR system = $2)
             ORDER BY system ASC, code ASC
             LIMIT $3 OFFSET $4"
        ))
        .bind(&pattern)
        .bind(system_str)
        .bind(count)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((total, rows))
    }

    pub async fn set_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        sqlx::query(
            "UPDATE source_codes SET embedding = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Vector::from(embedding))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Rows still missing an embedding, oldest first.
    pub async fn missing_embeddings(&self, limit: i64) -> Result<Vec<SourceCode>> {
        let rows = sqlx::query_as::<_, SourceCode>(&format!(
            "SELECT {COLUMNS} FROM source_codes
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
            "SELECT COUNT(*), COUNT(embedding) FROM source_codes",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    pub async fn count_by_system(&self, system: SourceSystem) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM source_codes WHERE system = $1")
                .bind(system.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(count)
    }
}
