//! Audit log repository

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// One request captured off the response path.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub request_body: Option<JsonValue>,
    pub response_status: Option<i32>,
    pub duration_ms: Option<i64>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRow {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    pub ip: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub response_status: Option<i32>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditLogRepository {
    pool: PgPool,
}

impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs
                 (action, resource_type, resource_id, actor, ip, user_agent,
                  method, path, request_body, response_status, duration_ms, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.actor)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.request_body)
        .bind(record.response_status)
        .bind(record.duration_ms)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Admin query, newest first.
    pub async fn query(
        &self,
        actor: Option<&str>,
        action: Option<&str>,
        since: Option<DateTime<Utc>>,
        page: i64,
        limit: i64,
    ) -> Result<Vec<AuditRow>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, action, resource_type, resource_id, actor, ip,
                    method, path, response_status, duration_ms, created_at
             FROM audit_logs
             WHERE ($1::text IS NULL OR actor = $1)
               AND ($2::text IS NULL OR action = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5",
        )
        .bind(actor)
        .bind(action)
        .bind(since)
        .bind(limit)
        .bind((page - 1).max(0) * limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows)
    }
}
