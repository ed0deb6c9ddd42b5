//! Scheduler worker — poll/lease/dispatch/advance/reap (§4.5).
//!
//! One `Worker` is one independent polling loop; multiple workers (in
//! one process or many) coordinate only through the store's atomic
//! lease CAS, never through in-process state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tam_domain::config::{SafetyConfig, SchedulerConfig};
use tam_domain::model::{ExecutionStatus, TaskKind};
use tokio::task::JoinHandle;

use crate::runtime::cron;
use crate::runtime::dispatch;
use crate::runtime::store::TaskStore;

fn generate_worker_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("worker-{suffix}")
}

pub struct Worker {
    id: String,
    store: Arc<TaskStore>,
    http: reqwest::Client,
    scheduler_cfg: SchedulerConfig,
    safety_cfg: SafetyConfig,
    running: Arc<AtomicBool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(store: Arc<TaskStore>, scheduler_cfg: SchedulerConfig, safety_cfg: SafetyConfig) -> Self {
        Self {
            id: generate_worker_id(),
            store,
            http: reqwest::Client::new(),
            scheduler_cfg,
            safety_cfg,
            running: Arc::new(AtomicBool::new(false)),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start polling and reaping. Idempotent — calling `start` while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let poll_self = Arc::clone(self);
        let poll_handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(poll_self.scheduler_cfg.poll_interval_secs));
            loop {
                ticker.tick().await;
                if !poll_self.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = poll_self.poll_once().await {
                    tracing::error!(worker_id = %poll_self.id, error = %e, "poll step failed");
                }
            }
        });

        let reap_self = Arc::clone(self);
        let reap_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                reap_self.scheduler_cfg.reaper_interval_secs,
            ));
            loop {
                ticker.tick().await;
                if !reap_self.running.load(Ordering::SeqCst) {
                    break;
                }
                match reap_self
                    .store
                    .reap_expired_leases(reap_self.scheduler_cfg.lock_timeout_secs, Utc::now())
                    .await
                {
                    Ok(n) if n > 0 => tracing::info!(worker_id = %reap_self.id, recovered = n, "reaper recovered stale leases"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(worker_id = %reap_self.id, error = %e, "reaper sweep failed"),
                }
            }
        });

        self.handles.lock().extend([poll_handle, reap_handle]);
    }

    /// Stop polling. In-flight dispatches are allowed to finish;
    /// callers that need a hard join should await the handles
    /// returned from `shutdown`.
    pub fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Graceful shutdown: clear the running flag, cancel timers, and
    /// join whatever poll/reap loop iteration is already in flight.
    pub async fn shutdown(self: &Arc<Self>) {
        self.stop();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// One poll step: lease up to `batch_size` due tasks and dispatch
    /// each, advancing or failing per §4.5 steps 1-6.
    pub async fn poll_once(&self) -> Result<(), tam_domain::Error> {
        let now = Utc::now();
        let candidates = self.store.due_tasks(now, self.scheduler_cfg.batch_size);

        for task in candidates {
            if !self.store.acquire_lease(task.id, &self.id, now).await? {
                continue; // lost the race to another worker
            }
            self.fire_one(task.id, now).await;
        }
        Ok(())
    }

    async fn fire_one(&self, task_id: uuid::Uuid, fired_at: chrono::DateTime<Utc>) {
        let Some(task) = self.store.get_task(task_id) else { return };

        let retry_number = task.current_retry_count;
        let request_url = task.callback_config.get("url").cloned();
        let request_payload = serde_json::Value::Object(task.payload.clone());

        let execution = match self
            .store
            .start_execution(task_id, retry_number, request_url.clone(), request_payload, fired_at)
            .await
        {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(worker_id = %self.id, task_id = %task_id, error = %e, "failed to open execution");
                let _ = self.store.release_lease(task_id).await;
                return;
            }
        };

        let started = std::time::Instant::now();
        let result = dispatch::dispatch(&self.http, &task, fired_at, &self.safety_cfg, &self.store).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        let status = if result.success {
            ExecutionStatus::Success
        } else if result.error.as_deref().map(|e| e.starts_with("timeout")).unwrap_or(false) {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failed
        };

        let mut finished = execution;
        finished.finished_at = Some(finished_at);
        finished.status = status;
        finished.response_code = result.status_code;
        finished.response_body = result.body.clone();
        finished.error_message = result.error.clone();
        finished.duration_ms = Some(duration_ms);

        if let Err(e) = self.store.finish_execution(finished).await {
            tracing::error!(worker_id = %self.id, task_id = %task_id, error = %e, "failed to finalize execution");
        }

        if result.success {
            self.advance_after_success(&task, fired_at).await;
        } else {
            self.advance_after_failure(&task, fired_at).await;
        }
    }

    async fn advance_after_success(&self, task: &tam_domain::model::Task, fired_at: chrono::DateTime<Utc>) {
        match task.kind {
            TaskKind::OneShot => {
                if let Err(e) = self.store.complete_one_shot(task.id, fired_at).await {
                    tracing::error!(worker_id = %self.id, task_id = %task.id, error = %e, "failed to complete one-shot task");
                }
            }
            TaskKind::Recurring => {
                let Some(cron_expr) = task.cron.as_deref() else {
                    let _ = self.store.fail_recurring_advance(task.id, fired_at).await;
                    return;
                };
                let tz = cron::parse_tz(&task.timezone);
                match cron::next_after(cron_expr, tz, &fired_at) {
                    Some(next) => {
                        if let Err(e) = self.store.advance_recurring(task.id, next, fired_at).await {
                            tracing::error!(worker_id = %self.id, task_id = %task.id, error = %e, "failed to advance recurring task");
                        }
                    }
                    None => {
                        // Open Question 2: next_after failure during
                        // advancement marks the task failed and does
                        // not leave the lease held.
                        tracing::error!(worker_id = %self.id, task_id = %task.id, "next_after produced no feasible next fire time");
                        let _ = self.store.fail_recurring_advance(task.id, fired_at).await;
                    }
                }
            }
        }
    }

    async fn advance_after_failure(&self, task: &tam_domain::model::Task, now: chrono::DateTime<Utc>) {
        match self.store.record_retry_failure(task.id, now).await {
            Ok(true) => tracing::warn!(worker_id = %self.id, task_id = %task.id, "task exceeded max_retries, marked failed"),
            Ok(false) => {}
            Err(e) => tracing::error!(worker_id = %self.id, task_id = %task.id, error = %e, "failed to record retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tam_domain::model::{CallbackKind, StoredNotification, Task, TaskStatus};
    use uuid::Uuid;

    fn sample_store_task(fire_at: chrono::DateTime<Utc>) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            name: "due-task".into(),
            description: None,
            kind: TaskKind::OneShot,
            fire_at: Some(fire_at),
            cron: None,
            timezone: "UTC".into(),
            next_fire_at: None,
            callback_kind: CallbackKind::Store,
            callback_config: HashMap::new(),
            payload: serde_json::json!({"k": 1}).as_object().unwrap().clone(),
            status: TaskStatus::Active,
            max_retries: 3,
            retry_delay_seconds: 60,
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: "alice".into(),
            tags: HashSet::new(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn temp_store() -> Arc<TaskStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::mem::forget(dir);
        Arc::new(TaskStore::load(path).await.unwrap())
    }

    #[tokio::test]
    async fn poll_once_fires_due_store_task_and_completes_it() {
        let store = temp_store().await;
        let due = sample_store_task(Utc::now() - chrono::Duration::seconds(5));
        let id = due.id;
        store.insert_task(due).await.unwrap();

        let worker = Worker::new(store.clone(), SchedulerConfig::default(), SafetyConfig::default());
        worker.poll_once().await.unwrap();

        let task = store.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.fire_count, 1);
        assert!(task.locked_at.is_none());
        assert_eq!(store.pull_notifications("alice", true).len(), 1);
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let store = temp_store().await;
        let worker = Arc::new(Worker::new(store, SchedulerConfig::default(), SafetyConfig::default()));
        worker.start();
        worker.start();
        assert!(worker.is_running());
        worker.shutdown().await;
        assert!(!worker.is_running());
        worker.stop();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn worker_id_has_minimum_length() {
        let store = temp_store().await;
        let worker = Worker::new(store, SchedulerConfig::default(), SafetyConfig::default());
        assert!(worker.id().len() >= 8);
    }

    fn _use_notification_type(_: &StoredNotification) {}
}
