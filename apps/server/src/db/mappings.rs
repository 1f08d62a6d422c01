//! Mapping repository
//!
//! Upserts are keyed on `(source_code_id, target_code_id)`. A row whose
//! `mapping_source` is HUMAN_VALIDATED is immutable to the pipeline: the
//! upsert leaves every reviewed field alone and only bumps `updated_at`.

use crate::models::{
    Equivalence, Mapping, MappingListRow, MappingSource, MappingStats, SourceSystem,
    ValidationStatus,
};
use crate::{Error, Result};
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

const LIST_COLUMNS: &str = "m.id, \
     s.code AS source_code, s.system AS source_system, s.term AS source_term, \
     s.english_name AS source_english_name, \
     t.code AS target_code, t.title AS target_title, \
     m.equivalence, m.confidence, m.mapping_source, m.validation_status, \
     m.validator, m.reasoning, m.created_at, m.updated_at";

/// Filters for the mapping listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub system: Option<SourceSystem>,
    pub equivalence: Option<Equivalence>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub status: Option<ValidationStatus>,
    pub query: Option<String>,
    pub sort: Option<String>,
    pub descending: bool,
}

#[derive(Clone)]
pub struct MappingRepository {
    pool: PgPool,
}

impl MappingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomic insert-or-update keyed on `(source_code_id, target_code_id)`.
    pub async fn upsert(
        &self,
        source_code_id: Uuid,
        target_code_id: Uuid,
        equivalence: Equivalence,
        confidence: f64,
        mapping_source: MappingSource,
        reasoning: &str,
    ) -> Result<Mapping> {
        let row = sqlx::query_as::<_, Mapping>(
            "INSERT INTO mappings
                 (source_code_id, target_code_id, equivalence, confidence, mapping_source, reasoning)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (source_code_id, target_code_id) DO UPDATE SET
                 equivalence = CASE WHEN mappings.mapping_source = 'HUMAN_VALIDATED'
                                    THEN mappings.equivalence ELSE EXCLUDED.equivalence END,
                 confidence = CASE WHEN mappings.mapping_source = 'HUMAN_VALIDATED'
                                   THEN mappings.confidence ELSE EXCLUDED.confidence END,
                 mapping_source = CASE WHEN mappings.mapping_source = 'HUMAN_VALIDATED'
                                       THEN mappings.mapping_source ELSE EXCLUDED.mapping_source END,
                 reasoning = CASE WHEN mappings.mapping_source = 'HUMAN_VALIDATED'
                                  THEN mappings.reasoning ELSE EXCLUDED.reasoning END,
                 updated_at = NOW()
             RETURNING id, source_code_id, target_code_id, equivalence, confidence,
                       mapping_source, validation_status, validator, validated_at,
                       reasoning, created_at, updated_at",
        )
        .bind(source_code_id)
        .bind(target_code_id)
        .bind(equivalence.as_str())
        .bind(confidence)
        .bind(mapping_source.as_str())
        .bind(reasoning)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    /// The current mapping for a source code, joined with both catalogs.
    /// When several targets exist for one source, the highest-confidence,
    /// most recently updated row wins.
    pub async fn find_for_source(
        &self,
        code: &str,
        system: SourceSystem,
    ) -> Result<Option<MappingListRow>> {
        let row = sqlx::query_as::<_, MappingListRow>(&format!(
            "SELECT {LIST_COLUMNS}
             FROM mappings m
             JOIN source_codes s ON s.id = m.source_code_id
             JOIN target_codes t ON t.id = m.target_code_id
             WHERE UPPER(s.code) = UPPER($1) AND s.system = $2
             ORDER BY m.confidence DESC, m.updated_at DESC
             LIMIT 1"
        ))
        .bind(code)
        .bind(system.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Mapping>> {
        let row = sqlx::query_as::<_, Mapping>(
            "SELECT id, source_code_id, target_code_id, equivalence, confidence,
                    mapping_source, validation_status, validator, validated_at,
                    reasoning, created_at, updated_at
             FROM mappings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    /// Human review action. Sets the review fields together; approval also
    /// flips the provenance to HUMAN_VALIDATED so later pipeline upserts
    /// cannot clobber the decision.
    pub async fn validate(
        &self,
        id: Uuid,
        status: ValidationStatus,
        validator: &str,
        equivalence: Option<Equivalence>,
    ) -> Result<Mapping> {
        let promote = matches!(status, ValidationStatus::Approved | ValidationStatus::Rejected);
        let row = sqlx::query_as::<_, Mapping>(
            "UPDATE mappings SET
                 validation_status = $2,
                 validator = $3,
                 validated_at = NOW(),
                 equivalence = COALESCE($4, equivalence),
                 mapping_source = CASE WHEN $5 THEN 'HUMAN_VALIDATED' ELSE mapping_source END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING id, source_code_id, target_code_id, equivalence, confidence,
                       mapping_source, validation_status, validator, validated_at,
                       reasoning, created_at, updated_at",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(validator)
        .bind(equivalence.map(|e| e.as_str()))
        .bind(promote)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.ok_or_else(|| Error::NotFound(format!("Mapping {id} not found")))
    }

    /// Paginated listing. `sort` is whitelisted to created_at, confidence
    /// and equivalence; anything else falls back to created_at.
    pub async fn list(
        &self,
        filters: &ListFilters,
        page: i64,
        limit: i64,
    ) -> Result<(i64, Vec<MappingListRow>)> {
        let sort_column = match filters.sort.as_deref() {
            Some("confidence") => "m.confidence",
            Some("equivalence") => "m.equivalence",
            _ => "m.created_at",
        };
        let direction = if filters.descending { "DESC" } else { "ASC" };

        let mut count_qb = QueryBuilder::new(
            "SELECT COUNT(*)
             FROM mappings m
             JOIN source_codes s ON s.id = m.source_code_id
             JOIN target_codes t ON t.id = m.target_code_id
             WHERE 1 = 1",
        );
        push_filters(&mut count_qb, filters);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?
            .get(0);

        let mut qb = QueryBuilder::new(format!(
            "SELECT {LIST_COLUMNS}
             FROM mappings m
             JOIN source_codes s ON s.id = m.source_code_id
             JOIN target_codes t ON t.id = m.target_code_id
             WHERE 1 = 1"
        ));
        push_filters(&mut qb, filters);
        qb.push(format!(" ORDER BY {sort_column} {direction}, m.id ASC"));
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind((page - 1).max(0) * limit);

        let rows = qb
            .build_query_as::<MappingListRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok((total, rows))
    }

    pub async fn stats(&self) -> Result<MappingStats> {
        let (total, average_confidence): (i64, Option<f64>) =
            sqlx::query_as("SELECT COUNT(*), AVG(confidence)::float8 FROM mappings")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        let by_mapping_source: Vec<(String, i64)> = sqlx::query_as(
            "SELECT mapping_source, COUNT(*) FROM mappings
             GROUP BY mapping_source ORDER BY mapping_source",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let by_validation_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT validation_status, COUNT(*) FROM mappings
             GROUP BY validation_status ORDER BY validation_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(MappingStats {
            total,
            by_mapping_source,
            by_validation_status,
            average_confidence,
        })
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, sqlx::Postgres>, filters: &'a ListFilters) {
    if let Some(system) = filters.system {
        qb.push(" AND s.system = ");
        qb.push_bind(system.as_str());
    }
    if let Some(equivalence) = filters.equivalence {
        qb.push(" AND m.equivalence = ");
        qb.push_bind(equivalence.as_str());
    }
    if let Some(min) = filters.min_confidence {
        qb.push(" AND m.confidence >= ");
        qb.push_bind(min);
    }
    if let Some(max) = filters.max_confidence {
        qb.push(" AND m.confidence <= ");
        qb.push_bind(max);
    }
    if let Some(status) = filters.status {
        qb.push(" AND m.validation_status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(query) = &filters.query {
        let pattern = format!("%{}%", query);
        qb.push(" AND (s.code ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR s.term ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR s.english_name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR t.code ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR t.title ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}
