//! Durable store — typed CRUD over `Task`/`Execution`/`StoredNotification`,
//! the atomic lease CAS, and the `due_tasks` selection query.
//!
//! Persistence mirrors the teacher's JSON-snapshot approach: the whole
//! in-memory state is serialized and written to disk on every mutating
//! call, via `spawn_blocking` so the async handlers never block on file
//! I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tam_domain::model::{
    CallbackKind, Execution, ExecutionStatus, StoredNotification, Task, TaskKind, TaskStatus,
};
use tam_domain::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event fan-out for anything watching store mutations (the HTTP
/// facade's long-poll surfaces could subscribe to this; the worker
/// does not need to).
#[derive(Debug, Clone)]
pub enum StoreEvent {
    TaskCreated(Uuid),
    TaskUpdated(Uuid),
    NotificationStored(Uuid),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    tasks: Vec<Task>,
    executions: Vec<Execution>,
    notifications: Vec<StoredNotification>,
}

struct Inner {
    tasks: HashMap<Uuid, Task>,
    executions: Vec<Execution>,
    notifications: HashMap<Uuid, StoredNotification>,
}

pub struct TaskStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
    path: PathBuf,
}

/// Filter for `list_tasks`, mirroring the `list_tasks` tool's optional
/// arguments (§4.6).
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub session_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub tags: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl TaskStore {
    /// Load from `path` if it exists, otherwise start empty.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            if bytes.is_empty() {
                Snapshot::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            Snapshot::default()
        };

        let (tx, _rx) = broadcast::channel(256);
        Ok(Self {
            inner: RwLock::new(Inner {
                tasks: snapshot.tasks.into_iter().map(|t| (t.id, t)).collect(),
                executions: snapshot.executions,
                notifications: snapshot
                    .notifications
                    .into_iter()
                    .map(|n| (n.id, n))
                    .collect(),
            }),
            events: tx,
            path,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn snapshot(&self) -> Snapshot {
        let guard = self.inner.read();
        Snapshot {
            tasks: guard.tasks.values().cloned().collect(),
            executions: guard.executions.clone(),
            notifications: guard.notifications.values().cloned().collect(),
        }
    }

    async fn persist(&self) -> Result<(), Error> {
        let snapshot = self.snapshot();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            std::fs::write(&path, bytes)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::StoreError(e.to_string()))??;
        Ok(())
    }

    // ── Task CRUD ────────────────────────────────────────────────

    pub async fn insert_task(&self, task: Task) -> Result<Task, Error> {
        let id = task.id;
        {
            let mut guard = self.inner.write();
            guard.tasks.insert(id, task.clone());
        }
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskCreated(id));
        Ok(task)
    }

    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.inner.read().tasks.get(&id).cloned()
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let guard = self.inner.read();
        let mut tasks: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| {
                filter
                    .session_id
                    .as_ref()
                    .map_or(true, |s| &t.created_by == s)
            })
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .filter(|t| {
                filter.tags.is_empty() || filter.tags.iter().any(|tag| t.tags.contains(tag))
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect()
    }

    /// Count of active+paused tasks owned by `session_id` — the
    /// per-session cap check at create time (§4.6).
    pub fn count_active_for_session(&self, session_id: &str) -> usize {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| t.created_by == session_id)
            .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Paused))
            .count()
    }

    /// `status IS active ∧ locked_at IS NULL ∧ due_at() <= now`,
    /// ordered ascending by due time, capped at `batch_size` — must
    /// match §4.5's `due_tasks` predicate exactly.
    pub fn due_tasks(&self, now: DateTime<Utc>, batch_size: usize) -> Vec<Task> {
        let guard = self.inner.read();
        let mut due: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.due_at());
        due.into_iter().take(batch_size).collect()
    }

    /// Atomic lease acquisition: succeeds only if the task is still
    /// `status = active ∧ locked_at IS NULL` at the moment of the
    /// write. Returns `false` on a lost race (no rows affected).
    pub async fn acquire_lease(
        &self,
        task_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let acquired = {
            let mut guard = self.inner.write();
            match guard.tasks.get_mut(&task_id) {
                Some(task) if task.status == TaskStatus::Active && task.locked_at.is_none() => {
                    task.locked_at = Some(now);
                    task.locked_by = Some(worker_id.to_string());
                    task.updated_at = now;
                    true
                }
                _ => false,
            }
        };
        if acquired {
            self.persist().await?;
        }
        Ok(acquired)
    }

    /// Release a lease without advancing the task (used when a
    /// dispatcher raises out-of-band and the retry budget is not yet
    /// exhausted).
    pub async fn release_lease(&self, task_id: Uuid) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            if let Some(task) = guard.tasks.get_mut(&task_id) {
                task.locked_at = None;
                task.locked_by = None;
                task.updated_at = Utc::now();
            }
        }
        self.persist().await?;
        Ok(())
    }

    /// Reaper sweep: clears leases held past `lock_timeout_secs`.
    /// Returns the number of tasks recovered.
    pub async fn reap_expired_leases(
        &self,
        lock_timeout_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, Error> {
        let recovered = {
            let mut guard = self.inner.write();
            let mut n = 0;
            for task in guard.tasks.values_mut() {
                if let Some(locked_at) = task.locked_at {
                    if (now - locked_at).num_seconds() >= lock_timeout_secs {
                        task.locked_at = None;
                        task.locked_by = None;
                        task.updated_at = now;
                        n += 1;
                    }
                }
            }
            n
        };
        if recovered > 0 {
            self.persist().await?;
        }
        Ok(recovered)
    }

    /// Finalize a one-shot task after a successful dispatch.
    pub async fn complete_one_shot(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            if let Some(task) = guard.tasks.get_mut(&task_id) {
                task.status = TaskStatus::Completed;
                task.last_fired_at = Some(now);
                task.fire_count += 1;
                task.locked_at = None;
                task.locked_by = None;
                task.current_retry_count = 0;
                task.updated_at = now;
            }
        }
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskUpdated(task_id));
        Ok(())
    }

    /// Re-arm a recurring task after a successful dispatch.
    pub async fn advance_recurring(
        &self,
        task_id: Uuid,
        next_fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            if let Some(task) = guard.tasks.get_mut(&task_id) {
                task.next_fire_at = Some(next_fire_at);
                task.last_fired_at = Some(now);
                task.fire_count += 1;
                task.locked_at = None;
                task.locked_by = None;
                task.current_retry_count = 0;
                task.updated_at = now;
            }
        }
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskUpdated(task_id));
        Ok(())
    }

    /// `next_after` failed during advancement of a recurring task
    /// (Open Question 2): mark failed, do not leave the lease held.
    pub async fn fail_recurring_advance(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            if let Some(task) = guard.tasks.get_mut(&task_id) {
                task.status = TaskStatus::Failed;
                task.locked_at = None;
                task.locked_by = None;
                task.updated_at = now;
            }
        }
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskUpdated(task_id));
        Ok(())
    }

    /// Dispatcher raised out-of-band: clear the lease, bump the retry
    /// counter, and fail the task once the budget is exhausted.
    pub async fn record_retry_failure(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<bool, Error> {
        let failed = {
            let mut guard = self.inner.write();
            match guard.tasks.get_mut(&task_id) {
                Some(task) => {
                    task.locked_at = None;
                    task.locked_by = None;
                    task.current_retry_count += 1;
                    task.updated_at = now;
                    if task.current_retry_count > task.max_retries {
                        task.status = TaskStatus::Failed;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskUpdated(task_id));
        Ok(failed)
    }

    /// State transitions for the `cancel`/`pause`/`resume` tools.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), Error> {
        self.transition(task_id, |task| {
            if matches!(task.status, TaskStatus::Active | TaskStatus::Paused) {
                task.status = TaskStatus::Cancelled;
                Ok(())
            } else {
                Err(Error::IllegalStateTransition(format!(
                    "cannot cancel a task in status {:?}",
                    task.status
                )))
            }
        })
        .await
    }

    pub async fn pause_task(&self, task_id: Uuid) -> Result<(), Error> {
        self.transition(task_id, |task| {
            if task.status == TaskStatus::Active {
                task.status = TaskStatus::Paused;
                Ok(())
            } else {
                Err(Error::IllegalStateTransition(format!(
                    "cannot pause a task in status {:?}",
                    task.status
                )))
            }
        })
        .await
    }

    /// Resume a paused task. Recomputes `next_fire_at` for recurring
    /// tasks before resuming (Open Question 1); does not bump
    /// `fire_count`.
    pub async fn resume_task(
        &self,
        task_id: Uuid,
        recompute_next_fire_at: impl FnOnce(&Task) -> Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        self.transition(task_id, |task| {
            if task.status != TaskStatus::Paused {
                return Err(Error::IllegalStateTransition(format!(
                    "cannot resume a task in status {:?}",
                    task.status
                )));
            }
            if task.kind == TaskKind::Recurring {
                task.next_fire_at = recompute_next_fire_at(task);
            }
            task.status = TaskStatus::Active;
            task.locked_at = None;
            task.locked_by = None;
            Ok(())
        })
        .await
    }

    async fn transition(
        &self,
        task_id: Uuid,
        f: impl FnOnce(&mut Task) -> Result<(), Error>,
    ) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            let task = guard
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| Error::NotFound(format!("task {task_id} not found")))?;
            f(task)?;
            task.updated_at = Utc::now();
        }
        self.persist().await?;
        let _ = self.events.send(StoreEvent::TaskUpdated(task_id));
        Ok(())
    }

    // ── Executions ───────────────────────────────────────────────

    pub async fn start_execution(
        &self,
        task_id: Uuid,
        retry_number: u32,
        request_url: Option<String>,
        request_payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Execution, Error> {
        let execution = Execution {
            id: Uuid::new_v4(),
            task_id,
            started_at: now,
            finished_at: None,
            status: ExecutionStatus::Running,
            response_code: None,
            response_body: None,
            error_message: None,
            duration_ms: None,
            retry_number,
            request_url,
            request_payload,
        };
        {
            let mut guard = self.inner.write();
            guard.executions.push(execution.clone());
        }
        self.persist().await?;
        Ok(execution)
    }

    /// Executions are immutable once terminal; this replaces the
    /// `running` placeholder with its final record.
    pub async fn finish_execution(&self, finished: Execution) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            if let Some(slot) = guard.executions.iter_mut().find(|e| e.id == finished.id) {
                *slot = finished;
            }
        }
        self.persist().await?;
        Ok(())
    }

    pub fn list_executions(&self, task_id: Uuid, limit: usize) -> Vec<Execution> {
        let guard = self.inner.read();
        let mut executions: Vec<Execution> = guard
            .executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        executions.truncate(limit);
        executions
    }

    // ── Stored notifications ────────────────────────────────────

    pub async fn insert_notification(
        &self,
        task: &Task,
        payload: serde_json::Value,
        session_id: String,
        fired_at: DateTime<Utc>,
    ) -> Result<StoredNotification, Error> {
        let notification = StoredNotification {
            id: Uuid::new_v4(),
            task_id: task.id,
            task_name: task.name.clone(),
            fired_at,
            payload,
            created_at: Utc::now(),
            read_at: None,
            session_id,
        };
        {
            let mut guard = self.inner.write();
            guard
                .notifications
                .insert(notification.id, notification.clone());
        }
        self.persist().await?;
        let _ = self
            .events
            .send(StoreEvent::NotificationStored(notification.id));
        Ok(notification)
    }

    pub fn pull_notifications(&self, session_id: &str, include_read: bool) -> Vec<StoredNotification> {
        let guard = self.inner.read();
        let mut notifications: Vec<StoredNotification> = guard
            .notifications
            .values()
            .filter(|n| n.session_id == session_id)
            .filter(|n| include_read || n.read_at.is_none())
            .cloned()
            .collect();
        notifications.sort_by_key(|n| n.fired_at);
        notifications
    }

    pub async fn mark_notification_read(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        {
            let mut guard = self.inner.write();
            let notification = guard
                .notifications
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("notification {id} not found")))?;
            notification.read_at = Some(now);
        }
        self.persist().await?;
        Ok(())
    }
}

/// Convenience alias used across the gateway crate.
pub type SharedStore = Arc<TaskStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap as StdHashMap, HashSet};

    fn sample_task(created_by: &str) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            name: "test".into(),
            description: None,
            kind: TaskKind::OneShot,
            fire_at: Some(now),
            cron: None,
            timezone: "UTC".into(),
            next_fire_at: None,
            callback_kind: CallbackKind::Store,
            callback_config: StdHashMap::new(),
            payload: serde_json::Map::new(),
            status: TaskStatus::Active,
            max_retries: 3,
            retry_delay_seconds: 60,
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: created_by.to_string(),
            tags: HashSet::new(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn temp_store() -> TaskStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        // leak the tempdir for the duration of the test process; fine
        // since these are short-lived unit tests.
        std::mem::forget(dir);
        TaskStore::load(path).await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = temp_store().await;
        let task = sample_task("alice");
        let id = task.id;
        store.insert_task(task).await.unwrap();
        assert!(store.get_task(id).is_some());
    }

    #[tokio::test]
    async fn due_tasks_respects_predicate() {
        let store = temp_store().await;
        let now = Utc::now();
        let mut due_task = sample_task("alice");
        due_task.fire_at = Some(now - chrono::Duration::seconds(5));
        let mut future_task = sample_task("alice");
        future_task.fire_at = Some(now + chrono::Duration::hours(1));
        store.insert_task(due_task.clone()).await.unwrap();
        store.insert_task(future_task).await.unwrap();

        let due = store.due_tasks(now, 50);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_task.id);
    }

    #[tokio::test]
    async fn only_one_concurrent_lease_acquire_succeeds() {
        let store = Arc::new(temp_store().await);
        let task = sample_task("alice");
        let id = task.id;
        store.insert_task(task).await.unwrap();

        let now = Utc::now();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.acquire_lease(id, &format!("worker-{i}"), now).await.unwrap()
            }));
        }
        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn reaper_clears_stale_lease() {
        let store = temp_store().await;
        let mut task = sample_task("alice");
        let stale = Utc::now() - chrono::Duration::seconds(120);
        task.locked_at = Some(stale);
        task.locked_by = Some("dead-worker".into());
        let id = task.id;
        store.insert_task(task).await.unwrap();

        let recovered = store.reap_expired_leases(60, Utc::now()).await.unwrap();
        assert_eq!(recovered, 1);
        assert!(store.get_task(id).unwrap().locked_at.is_none());
    }

    #[tokio::test]
    async fn cancel_rejects_terminal_status() {
        let store = temp_store().await;
        let mut task = sample_task("alice");
        task.status = TaskStatus::Completed;
        let id = task.id;
        store.insert_task(task).await.unwrap();

        let err = store.cancel_task(id).await.unwrap_err();
        assert_eq!(err.kind(), "IllegalStateTransition");
    }

    #[tokio::test]
    async fn session_active_cap_counts_active_and_paused_only() {
        let store = temp_store().await;
        let mut completed = sample_task("bob");
        completed.status = TaskStatus::Completed;
        store.insert_task(sample_task("bob")).await.unwrap();
        store.insert_task(completed).await.unwrap();

        assert_eq!(store.count_active_for_session("bob"), 1);
    }

    #[tokio::test]
    async fn notification_pull_excludes_read_by_default() {
        let store = temp_store().await;
        let task = sample_task("alice");
        store.insert_task(task.clone()).await.unwrap();
        let notification = store
            .insert_notification(&task, serde_json::json!({"k": 1}), "alice".into(), Utc::now())
            .await
            .unwrap();

        assert_eq!(store.pull_notifications("alice", false).len(), 1);
        store.mark_notification_read(notification.id, Utc::now()).await.unwrap();
        assert_eq!(store.pull_notifications("alice", false).len(), 0);
        assert_eq!(store.pull_notifications("alice", true).len(), 1);
    }
}
