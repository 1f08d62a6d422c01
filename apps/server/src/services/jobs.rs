//! Asynchronous batch mapping jobs
//!
//! A bounded FIFO of in-memory jobs. A single driver task starts up to
//! `max_concurrent` jobs; within one job, items run strictly sequentially
//! with a small delay between them to smooth external-model rate limits.
//! Cancellation is observed at item boundaries: the in-flight item finishes
//! (and persists when requested), later items never start.
//!
//! Registry state is mutated under one lock; progress events are emitted
//! outside it on a best-effort broadcast channel.

use crate::config::JobsConfig;
use crate::models::{
    BatchJob, JobItem, JobItemStatus, JobProgress, JobStatus, ProgressEvent, SourceSystem,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

/// Processes one batch item. Implemented by the translate service; stubbed
/// in tests.
#[async_trait]
pub trait JobItemRunner: Send + Sync {
    async fn run_item(
        &self,
        code: &str,
        system: SourceSystem,
        save_results: bool,
    ) -> std::result::Result<JsonValue, String>;
}

struct Inner {
    jobs: HashMap<Uuid, BatchJob>,
    pending: VecDeque<Uuid>,
    active: usize,
}

pub struct JobRegistry {
    inner: Mutex<Inner>,
    notify: Notify,
    events: broadcast::Sender<ProgressEvent>,
    config: JobsConfig,
    webhook_client: reqwest::Client,
}

impl JobRegistry {
    pub fn new(config: JobsConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let webhook_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Arc::new(Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                active: 0,
            }),
            notify: Notify::new(),
            events,
            config,
            webhook_client,
        })
    }

    /// Admit a job and wake the driver. Size validation happens in the
    /// handler so the 400 carries the request context.
    pub fn submit(
        &self,
        items: Vec<JobItem>,
        actor: Option<String>,
        callback_url: Option<String>,
        save_results: bool,
    ) -> Result<JsonValue> {
        if items.is_empty() {
            return Err(Error::Validation("codes must not be empty".to_string()));
        }

        let job = BatchJob::new(items, actor, callback_url, save_results);
        let snapshot = job.status_snapshot();

        {
            let mut inner = self.inner.lock().expect("job registry mutex poisoned");
            inner.pending.push_back(job.id);
            inner.jobs.insert(job.id, job);
        }
        self.notify.notify_one();

        Ok(snapshot)
    }

    pub fn get(&self, id: Uuid) -> Option<JsonValue> {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.jobs.get(&id).map(|job| job.status_snapshot())
    }

    /// Full job including per-item results (pending items visible).
    pub fn results(&self, id: Uuid) -> Option<BatchJob> {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.jobs.get(&id).cloned()
    }

    /// Cancel a PENDING or PROCESSING job. The driver observes the flag at
    /// the next item boundary; a job that never started terminates here.
    pub fn cancel(&self, id: Uuid) -> Result<JsonValue> {
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Job {id} not found")))?;

        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.cancel_requested = true;
                job.completed_at = Some(Utc::now());
                let snapshot = job.status_snapshot();
                inner.pending.retain(|queued| *queued != id);
                Ok(snapshot)
            }
            JobStatus::Processing => {
                job.status = JobStatus::Cancelled;
                job.cancel_requested = true;
                Ok(job.status_snapshot())
            }
            status => Err(Error::Conflict(format!(
                "Job {id} is already {}",
                serde_json::to_string(&status).unwrap_or_default().trim_matches('"')
            ))),
        }
    }

    /// Subscribe to best-effort progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> JsonValue {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        crate::metrics::JOBS_GAUGE
            .with_label_values(&["queued"])
            .set(inner.pending.len() as i64);
        crate::metrics::JOBS_GAUGE
            .with_label_values(&["active"])
            .set(inner.active as i64);
        crate::metrics::JOBS_GAUGE
            .with_label_values(&["retained"])
            .set(inner.jobs.len() as i64);
        serde_json::json!({
            "queued": inner.pending.len(),
            "active": inner.active,
            "retained": inner.jobs.len(),
        })
    }

    /// Rough wall-clock estimate for a fresh job, in seconds.
    pub fn estimate_seconds(&self, item_count: usize) -> u64 {
        let per_item_ms = self.config.item_delay_ms + 2_000;
        (item_count as u64 * per_item_ms) / 1_000
    }

    /// Spawn the driver and the retention reaper. The driver holds no lock
    /// across awaits.
    pub fn start(self: Arc<Self>, runner: Arc<dyn JobItemRunner>) {
        let registry = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                Self::launch_ready(&registry, &runner);
                registry.notify.notified().await;
            }
        });

        let registry = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3_600));
            loop {
                tick.tick().await;
                let reaped = registry.reap();
                if reaped > 0 {
                    tracing::info!(reaped, "Reaped retained batch jobs");
                }
            }
        });
    }

    /// Start queued jobs while concurrency budget remains.
    fn launch_ready(registry: &Arc<Self>, runner: &Arc<dyn JobItemRunner>) {
        loop {
            let next = {
                let mut inner = registry.inner.lock().expect("job registry mutex poisoned");
                if inner.active >= registry.config.max_concurrent {
                    return;
                }
                let Some(id) = inner.pending.pop_front() else {
                    return;
                };
                let Some(job) = inner.jobs.get_mut(&id) else {
                    continue;
                };
                if job.status != JobStatus::Pending {
                    continue;
                }
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                inner.active += 1;
                id
            };

            let registry = Arc::clone(registry);
            let runner = Arc::clone(runner);
            tokio::spawn(async move {
                registry.run_job(next, runner).await;
                {
                    let mut inner = registry.inner.lock().expect("job registry mutex poisoned");
                    inner.active -= 1;
                }
                registry.notify.notify_one();
            });
        }
    }

    async fn run_job(&self, id: Uuid, runner: Arc<dyn JobItemRunner>) {
        let (items, save_results) = {
            let inner = self.inner.lock().expect("job registry mutex poisoned");
            match inner.jobs.get(&id) {
                Some(job) => (
                    job.items
                        .iter()
                        .map(|item| (item.code.clone(), item.system))
                        .collect::<Vec<_>>(),
                    job.save_results,
                ),
                None => return,
            }
        };

        tracing::info!(job_id = %id, items = items.len(), "Batch job started");

        for (index, (code, system)) in items.iter().enumerate() {
            // Observe cancellation at the item boundary.
            let cancelled = {
                let inner = self.inner.lock().expect("job registry mutex poisoned");
                inner
                    .jobs
                    .get(&id)
                    .map(|job| job.cancel_requested)
                    .unwrap_or(true)
            };
            if cancelled {
                break;
            }

            self.update_item(id, index, |item| {
                item.status = JobItemStatus::Processing;
            });

            let result = runner.run_item(code, *system, save_results).await;

            let event = {
                let mut inner = self.inner.lock().expect("job registry mutex poisoned");
                let Some(job) = inner.jobs.get_mut(&id) else {
                    return;
                };
                let succeeded = result.is_ok();
                let item = &mut job.items[index];
                match result {
                    Ok(value) => {
                        item.status = JobItemStatus::Success;
                        item.result = Some(value);
                    }
                    Err(message) => {
                        item.status = JobItemStatus::Failed;
                        item.error = Some(message);
                    }
                }
                job.progress.record(succeeded);
                crate::metrics::JOB_ITEMS_TOTAL
                    .with_label_values(&[if succeeded { "success" } else { "failed" }])
                    .inc();
                ProgressEvent {
                    job_id: id,
                    item_index: index,
                    code: code.clone(),
                    status: job.items[index].status,
                    progress: job.progress,
                }
            };
            // Best-effort; no receivers is fine.
            let _ = self.events.send(event);

            if index + 1 < items.len() && self.config.item_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.item_delay_ms)).await;
            }
        }

        let (terminal, callback) = {
            let mut inner = self.inner.lock().expect("job registry mutex poisoned");
            let Some(job) = inner.jobs.get_mut(&id) else {
                return;
            };
            job.status = if job.cancel_requested {
                JobStatus::Cancelled
            } else if job.progress.successful > 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            job.completed_at = Some(Utc::now());
            (job.status_snapshot(), job.callback_url.clone())
        };

        tracing::info!(job_id = %id, status = %terminal["status"], "Batch job finished");

        if let Some(url) = callback {
            if let Err(e) = self.webhook_client.post(&url).json(&terminal).send().await {
                tracing::warn!(job_id = %id, url = %url, "Completion webhook failed: {e}");
            }
        }
    }

    fn update_item(&self, id: Uuid, index: usize, apply: impl FnOnce(&mut JobItem)) {
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        if let Some(job) = inner.jobs.get_mut(&id) {
            if let Some(item) = job.items.get_mut(index) {
                apply(item);
            }
        }
    }

    /// Remove terminal jobs past the retention window. Returns how many
    /// were dropped.
    pub fn reap(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::milliseconds(self.config.retention_ms.min(i64::MAX as u64) as i64);
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        before - inner.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn config(max_concurrent: usize) -> JobsConfig {
        JobsConfig {
            max_concurrent,
            item_delay_ms: 0,
            retention_ms: 86_400_000,
            max_batch_size: 100,
        }
    }

    fn items(codes: &[&str]) -> Vec<JobItem> {
        codes
            .iter()
            .map(|code| JobItem::new(code.to_string(), SourceSystem::Ayurveda))
            .collect()
    }

    /// Runner that blocks on a semaphore permit per item and records calls.
    struct GatedRunner {
        gate: Arc<Semaphore>,
        calls: AtomicUsize,
        fail_codes: Vec<String>,
    }

    impl GatedRunner {
        fn open(fail_codes: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::new(Semaphore::new(10_000)),
                calls: AtomicUsize::new(0),
                fail_codes: fail_codes.iter().map(|s| s.to_string()).collect(),
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::new(Semaphore::new(0)),
                calls: AtomicUsize::new(0),
                fail_codes: vec![],
            })
        }
    }

    #[async_trait]
    impl JobItemRunner for GatedRunner {
        async fn run_item(
            &self,
            code: &str,
            _system: SourceSystem,
            _save_results: bool,
        ) -> std::result::Result<JsonValue, String> {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_codes.iter().any(|c| c == code) {
                Err("code not found".to_string())
            } else {
                Ok(serde_json::json!({ "code": code, "matched": true }))
            }
        }
    }

    async fn wait_until<F: Fn() -> bool>(predicate: F) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    fn job_status(registry: &JobRegistry, id: Uuid) -> JobStatus {
        registry.results(id).expect("job exists").status
    }

    #[tokio::test]
    async fn completes_when_every_item_succeeds() {
        let registry = JobRegistry::new(config(3));
        let runner = GatedRunner::open(&[]);
        registry.clone().start(runner.clone());

        let snapshot = registry
            .submit(items(&["AAA-1", "AAA-2"]), None, None, true)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();
        assert_eq!(snapshot["status"], serde_json::json!("PENDING"));

        wait_until(|| job_status(&registry, id).is_terminal()).await;

        let job = registry.results(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.completed, 2);
        assert_eq!(job.progress.successful, 2);
        assert_eq!(job.progress.percentage, 100);
        assert!(job.completed_at.is_some());
        assert!(job.items.iter().all(|i| i.status == JobItemStatus::Success));
    }

    #[tokio::test]
    async fn fails_when_every_item_errors() {
        let registry = JobRegistry::new(config(3));
        let runner = GatedRunner::open(&["AAA-1", "AAA-2"]);
        registry.clone().start(runner);

        let snapshot = registry
            .submit(items(&["AAA-1", "AAA-2"]), None, None, false)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        wait_until(|| job_status(&registry, id).is_terminal()).await;

        let job = registry.results(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress.failed, 2);
        assert!(job.items.iter().all(|i| i.error.is_some()));
    }

    #[tokio::test]
    async fn partial_success_still_completes() {
        let registry = JobRegistry::new(config(3));
        let runner = GatedRunner::open(&["AAA-2"]);
        registry.clone().start(runner);

        let snapshot = registry
            .submit(items(&["AAA-1", "AAA-2"]), None, None, false)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        wait_until(|| job_status(&registry, id).is_terminal()).await;

        let job = registry.results(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.successful, 1);
        assert_eq!(job.progress.failed, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_at_item_boundary() {
        let registry = JobRegistry::new(config(3));
        let runner = GatedRunner::gated();
        registry.clone().start(runner.clone());

        let snapshot = registry
            .submit(items(&["AAA-1", "AAA-2", "AAA-3"]), None, None, true)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        // Let exactly the first item through, then cancel.
        runner.gate.add_permits(1);
        wait_until(|| {
            registry
                .results(id)
                .map(|job| job.progress.completed >= 1)
                .unwrap_or(false)
        })
        .await;

        registry.cancel(id).unwrap();
        runner.gate.add_permits(10);

        wait_until(|| {
            registry
                .results(id)
                .map(|job| job.completed_at.is_some())
                .unwrap_or(false)
        })
        .await;

        let job = registry.results(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.progress.completed >= 1);
        assert!(job.progress.completed + job.progress.failed <= 3);
        // Later items never ran.
        assert!(runner.calls.load(Ordering::SeqCst) <= 2);
        assert_eq!(job.items[2].status, JobItemStatus::Pending);
    }

    #[tokio::test]
    async fn pending_job_cancels_immediately() {
        let registry = JobRegistry::new(config(3));
        // No driver started: the job stays PENDING.
        let snapshot = registry
            .submit(items(&["AAA-1"]), None, None, false)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        let cancelled = registry.cancel(id).unwrap();
        assert_eq!(cancelled["status"], serde_json::json!("CANCELLED"));
        assert!(registry.results(id).unwrap().completed_at.is_some());

        // A second cancel conflicts.
        assert!(matches!(registry.cancel(id), Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn jobs_queue_beyond_concurrency_budget() {
        let registry = JobRegistry::new(config(1));
        let runner = GatedRunner::gated();
        registry.clone().start(runner.clone());

        let first = registry.submit(items(&["AAA-1"]), None, None, false).unwrap();
        let second = registry.submit(items(&["AAA-2"]), None, None, false).unwrap();
        let first_id: Uuid = serde_json::from_value(first["job_id"].clone()).unwrap();
        let second_id: Uuid = serde_json::from_value(second["job_id"].clone()).unwrap();

        wait_until(|| job_status(&registry, first_id) == JobStatus::Processing).await;
        // Budget of one: the second job must still be pending.
        assert_eq!(job_status(&registry, second_id), JobStatus::Pending);

        runner.gate.add_permits(10);
        wait_until(|| job_status(&registry, second_id).is_terminal()).await;
        assert_eq!(job_status(&registry, first_id), JobStatus::Completed);
    }

    #[tokio::test]
    async fn progress_events_are_observable() {
        let registry = JobRegistry::new(config(1));
        let runner = GatedRunner::open(&[]);
        let mut events = registry.subscribe();
        registry.clone().start(runner);

        let snapshot = registry
            .submit(items(&["AAA-1", "AAA-2"]), None, None, false)
            .unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(first.job_id, id);
        assert_eq!(first.item_index, 0);
        assert_eq!(first.progress.completed, 1);
    }

    #[tokio::test]
    async fn reap_drops_only_expired_terminal_jobs() {
        let registry = JobRegistry::new(JobsConfig {
            max_concurrent: 1,
            item_delay_ms: 0,
            retention_ms: 0,
            max_batch_size: 100,
        });
        let snapshot = registry.submit(items(&["AAA-1"]), None, None, false).unwrap();
        let id: Uuid = serde_json::from_value(snapshot["job_id"].clone()).unwrap();

        // Still pending: retained.
        assert_eq!(registry.reap(), 0);

        registry.cancel(id).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.reap(), 1);
        assert!(registry.get(id).is_none());
    }
}
