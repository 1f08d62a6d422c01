//! Batch job domain models
//!
//! Jobs live only in process memory; they are not persisted across restarts.

use crate::models::SourceSystem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobItem {
    pub code: String,
    pub system: SourceSystem,
    pub status: JobItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobItem {
    pub fn new(code: String, system: SourceSystem) -> Self {
        Self {
            code,
            system,
            status: JobItemStatus::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub percentage: u32,
}

impl JobProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            successful: 0,
            failed: 0,
            percentage: 0,
        }
    }

    /// Record one finished item and recompute the floor percentage.
    pub fn record(&mut self, succeeded: bool) {
        self.completed += 1;
        if succeeded {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        if self.total > 0 {
            self.percentage = (100 * self.completed / self.total) as u32;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub items: Vec<JobItem>,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub callback_url: Option<String>,
    pub save_results: bool,
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl BatchJob {
    pub fn new(
        items: Vec<JobItem>,
        actor: Option<String>,
        callback_url: Option<String>,
        save_results: bool,
    ) -> Self {
        let total = items.len();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            items,
            progress: JobProgress::new(total),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            actor,
            callback_url,
            save_results,
            cancel_requested: false,
        }
    }

    /// Snapshot without per-item payloads, for status endpoints.
    pub fn status_snapshot(&self) -> JsonValue {
        serde_json::json!({
            "job_id": self.id,
            "status": self.status,
            "progress": self.progress,
            "created_at": self.created_at,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
        })
    }
}

/// Best-effort progress record emitted after each item.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub item_index: usize,
    pub code: String,
    pub status: JobItemStatus,
    pub progress: JobProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percentage_floors() {
        let mut p = JobProgress::new(3);
        p.record(true);
        assert_eq!(p.percentage, 33);
        p.record(false);
        assert_eq!(p.percentage, 66);
        p.record(true);
        assert_eq!(p.percentage, 100);
        assert_eq!(p.completed, 3);
        assert_eq!(p.successful, 2);
        assert_eq!(p.failed, 1);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
