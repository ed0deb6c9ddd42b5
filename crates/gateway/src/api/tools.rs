//! The 7 named tool operations (§4.6). Each takes a `params` JSON
//! object plus the caller's session id and returns `{success, ...}` or
//! `{success:false, error}` — validation/rate-limit errors never reach
//! the store.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tam_domain::model::{CallbackKind, Task, TaskKind, TaskStatus};
use tam_domain::Error;
use uuid::Uuid;

use crate::runtime::cron;
use crate::runtime::safety;
use crate::runtime::store::{TaskFilter, TaskStore};
use crate::state::AppState;

fn err(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

/// Whether internal error detail is safe to surface — mirrors
/// `Error::public_message`'s `development` flag against the configured
/// environment.
fn dev(state: &AppState) -> bool {
    !state.config.safety.environment.is_production()
}

fn str_arg<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn task_summary(task: &Task) -> Value {
    json!({
        "id": task.id,
        "name": task.name,
        "description": task.description,
        "kind": task.kind,
        "fire_at": task.fire_at,
        "cron": task.cron,
        "timezone": task.timezone,
        "next_fire_at": task.next_fire_at,
        "callback_kind": task.callback_kind,
        "status": task.status,
        "max_retries": task.max_retries,
        "current_retry_count": task.current_retry_count,
        "last_fired_at": task.last_fired_at,
        "fire_count": task.fire_count,
        "tags": task.tags,
        "created_at": task.created_at,
        "updated_at": task.updated_at,
    })
}

fn parse_callback_kind(s: &str) -> Option<CallbackKind> {
    match s {
        "webhook" => Some(CallbackKind::Webhook),
        "chat" => Some(CallbackKind::Chat),
        "email" => Some(CallbackKind::Email),
        "store" => Some(CallbackKind::Store),
        _ => None,
    }
}

fn parse_callback_config(params: &Map<String, Value>) -> HashMap<String, String> {
    params
        .get("callback_config")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

async fn validate_webhook_url_if_present(
    callback_kind: CallbackKind,
    callback_config: &HashMap<String, String>,
    cfg: &tam_domain::config::SafetyConfig,
) -> Result<(), Error> {
    let url_key = match callback_kind {
        CallbackKind::Webhook => "url",
        CallbackKind::Chat => "webhook_url",
        _ => return Ok(()),
    };
    if let Some(url) = callback_config.get(url_key) {
        safety::validate_url(url, cfg).await?;
    } else {
        return Err(Error::InvalidInput(format!("callback_config.{url_key} is required")));
    }
    Ok(())
}

/// `schedule_one_shot` — name, one of at/in, callback.
pub async fn schedule_one_shot(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let Some(name) = str_arg(params, "name") else {
        return err("'name' is required");
    };
    let Some(callback_kind_s) = str_arg(params, "callback_kind") else {
        return err("'callback_kind' is required");
    };
    let Some(callback_kind) = parse_callback_kind(callback_kind_s) else {
        return err(format!("unknown callback kind '{callback_kind_s}'"));
    };

    let now = Utc::now();
    let time_input = str_arg(params, "at").or_else(|| str_arg(params, "in"));
    let Some(time_input) = time_input else {
        return err("one of 'at' or 'in' is required");
    };
    let fire_at = match cron::resolve_fire_at(time_input, now) {
        Ok(t) => t,
        Err(e) => return err(e.public_message(dev(state))),
    };

    let callback_config = parse_callback_config(params);
    if let Err(e) = validate_webhook_url_if_present(callback_kind, &callback_config, &state.config.safety).await {
        return err(e.public_message(dev(state)));
    }

    let payload = match safety::sanitize_payload(params.get("payload"), state.config.safety.max_payload_size) {
        Ok(p) => p,
        Err(e) => return err(e.public_message(dev(state))),
    };

    if state.store.count_active_for_session(session_id) >= state.config.scheduler.max_active_tasks {
        return err(format!(
            "session has reached the maximum of {} active tasks",
            state.config.scheduler.max_active_tasks
        ));
    }

    let task = Task {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: str_arg(params, "description").map(str::to_string),
        kind: TaskKind::OneShot,
        fire_at: Some(fire_at),
        cron: None,
        timezone: "UTC".into(),
        next_fire_at: None,
        callback_kind,
        callback_config,
        payload,
        status: TaskStatus::Active,
        max_retries: params.get("max_retries").and_then(Value::as_u64).unwrap_or(3) as u32,
        retry_delay_seconds: params.get("retry_delay_seconds").and_then(Value::as_u64).unwrap_or(60),
        current_retry_count: 0,
        last_fired_at: None,
        fire_count: 0,
        created_by: session_id.to_string(),
        tags: params
            .get("tags")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        locked_at: None,
        locked_by: None,
        created_at: now,
        updated_at: now,
    };

    match state.store.insert_task(task).await {
        Ok(task) => json!({ "success": true, "task": task_summary(&task) }),
        Err(e) => err(e.public_message(dev(state))),
    }
}

/// `schedule_recurring` — name, cron, callback.
pub async fn schedule_recurring(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let Some(name) = str_arg(params, "name") else {
        return err("'name' is required");
    };
    let Some(cron_expr) = str_arg(params, "cron") else {
        return err("'cron' is required");
    };
    if let Err(e) = safety::validate_cron_shape(cron_expr) {
        return err(e.public_message(dev(state)));
    }
    if let Err(e) = safety::validate_cron_semantics(cron_expr) {
        return err(e.public_message(dev(state)));
    }

    let timezone = str_arg(params, "timezone").unwrap_or("UTC");
    if let Err(e) = safety::validate_timezone(timezone) {
        return err(e.public_message(dev(state)));
    }
    let tz = cron::parse_tz(timezone);

    let Some(callback_kind_s) = str_arg(params, "callback_kind") else {
        return err("'callback_kind' is required");
    };
    let Some(callback_kind) = parse_callback_kind(callback_kind_s) else {
        return err(format!("unknown callback kind '{callback_kind_s}'"));
    };

    let now = Utc::now();
    let next_fire_at = match cron::next_after(cron_expr, tz, &now) {
        Some(t) => t,
        None => return err("cron expression does not match within one year"),
    };

    let callback_config = parse_callback_config(params);
    if let Err(e) = validate_webhook_url_if_present(callback_kind, &callback_config, &state.config.safety).await {
        return err(e.public_message(dev(state)));
    }

    let payload = match safety::sanitize_payload(params.get("payload"), state.config.safety.max_payload_size) {
        Ok(p) => p,
        Err(e) => return err(e.public_message(dev(state))),
    };

    if state.store.count_active_for_session(session_id) >= state.config.scheduler.max_active_tasks {
        return err(format!(
            "session has reached the maximum of {} active tasks",
            state.config.scheduler.max_active_tasks
        ));
    }

    let enabled = params.get("enabled").and_then(Value::as_bool).unwrap_or(true);

    let task = Task {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: str_arg(params, "description").map(str::to_string),
        kind: TaskKind::Recurring,
        fire_at: None,
        cron: Some(cron_expr.to_string()),
        timezone: timezone.to_string(),
        next_fire_at: Some(next_fire_at),
        callback_kind,
        callback_config,
        payload,
        status: if enabled { TaskStatus::Active } else { TaskStatus::Paused },
        max_retries: params.get("max_retries").and_then(Value::as_u64).unwrap_or(3) as u32,
        retry_delay_seconds: params.get("retry_delay_seconds").and_then(Value::as_u64).unwrap_or(60),
        current_retry_count: 0,
        last_fired_at: None,
        fire_count: 0,
        created_by: session_id.to_string(),
        tags: params
            .get("tags")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        locked_at: None,
        locked_by: None,
        created_at: now,
        updated_at: now,
    };

    match state.store.insert_task(task).await {
        Ok(task) => json!({ "success": true, "task": task_summary(&task) }),
        Err(e) => err(e.public_message(dev(state))),
    }
}

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// `list_tasks` — tasks owned by the caller's session.
pub fn list_tasks(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let status = match str_arg(params, "status") {
        Some("active") => Some(TaskStatus::Active),
        Some("paused") => Some(TaskStatus::Paused),
        Some("completed") => Some(TaskStatus::Completed),
        Some("failed") => Some(TaskStatus::Failed),
        Some("cancelled") => Some(TaskStatus::Cancelled),
        Some(other) => return err(format!("unknown status '{other}'")),
        None => Some(TaskStatus::Active),
    };
    let kind = match str_arg(params, "kind") {
        Some("one_shot") => Some(TaskKind::OneShot),
        Some("recurring") => Some(TaskKind::Recurring),
        Some(other) => return err(format!("unknown kind '{other}'")),
        None => None,
    };
    let tags: Vec<String> = params
        .get("tags")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let limit = params
        .get("limit")
        .and_then(Value::as_u64)
        .map(|n| (n as usize).min(MAX_LIST_LIMIT))
        .unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;

    let filter = TaskFilter {
        session_id: Some(session_id.to_string()),
        status,
        kind,
        tags,
        limit,
        offset,
    };
    let tasks = state.store.list_tasks(&filter);
    json!({ "success": true, "tasks": tasks.iter().map(task_summary).collect::<Vec<_>>() })
}

/// `get_task` — id, optional include_history.
pub fn get_task(state: &AppState, params: &Map<String, Value>) -> Value {
    let Some(id) = str_arg(params, "id").and_then(|s| Uuid::parse_str(s).ok()) else {
        return err("'id' must be a valid task id");
    };
    let Some(task) = state.store.get_task(id) else {
        return err(format!("task {id} not found"));
    };

    let mut body = task_summary(&task);
    if params.get("include_history").and_then(Value::as_bool).unwrap_or(false) {
        let history = state.store.list_executions(id, 10);
        body["history"] = json!(history);
    }
    json!({ "success": true, "task": body })
}

async fn require_owned_task(store: &TaskStore, id_str: &str, session_id: &str) -> Result<Uuid, Value> {
    let Some(id) = Uuid::parse_str(id_str).ok() else {
        return Err(err("'id' must be a valid task id"));
    };
    match store.get_task(id) {
        Some(task) if task.created_by == session_id => Ok(id),
        Some(_) => Err(err(format!("task {id} not found"))),
        None => Err(err(format!("task {id} not found"))),
    }
}

/// `cancel_task` — valid only from {active, paused}.
pub async fn cancel_task(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let Some(id_str) = str_arg(params, "id") else { return err("'id' is required") };
    let id = match require_owned_task(&state.store, id_str, session_id).await {
        Ok(id) => id,
        Err(e) => return e,
    };
    match state.store.cancel_task(id).await {
        Ok(()) => json!({ "success": true }),
        Err(e) => err(e.public_message(dev(state))),
    }
}

/// `pause_task` — valid only when status=active.
pub async fn pause_task(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let Some(id_str) = str_arg(params, "id") else { return err("'id' is required") };
    let id = match require_owned_task(&state.store, id_str, session_id).await {
        Ok(id) => id,
        Err(e) => return e,
    };
    match state.store.pause_task(id).await {
        Ok(()) => json!({ "success": true }),
        Err(e) => err(e.public_message(dev(state))),
    }
}

/// `resume_task` — valid only when status=paused; recurring tasks
/// recompute `next_fire_at` before resuming.
pub async fn resume_task(state: &AppState, params: &Map<String, Value>, session_id: &str) -> Value {
    let Some(id_str) = str_arg(params, "id") else { return err("'id' is required") };
    let id = match require_owned_task(&state.store, id_str, session_id).await {
        Ok(id) => id,
        Err(e) => return e,
    };
    let result = state
        .store
        .resume_task(id, |task| {
            task.cron.as_deref().and_then(|c| cron::next_after(c, cron::parse_tz(&task.timezone), &Utc::now()))
        })
        .await;
    match result {
        Ok(()) => json!({ "success": true }),
        Err(e) => err(e.public_message(dev(state))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::rate_limit::RateLimiter;
    use crate::runtime::worker::Worker;
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::mem::forget(dir);
        let config = Arc::new(tam_domain::config::Config::default());
        let store = Arc::new(TaskStore::load(path).await.unwrap());
        let worker = Arc::new(Worker::new(store.clone(), config.scheduler.clone(), config.safety.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        AppState { config, store, worker, rate_limiter }
    }

    #[tokio::test]
    async fn schedule_one_shot_rejects_blocked_webhook_host() {
        let state = test_state().await;
        let params = json!({
            "name": "ping",
            "in": "10s",
            "callback_kind": "webhook",
            "callback_config": {"url": "http://169.254.169.254/"},
        });
        let result = schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        assert_eq!(result["success"], json!(false));
    }

    #[tokio::test]
    async fn schedule_one_shot_store_callback_succeeds() {
        let state = test_state().await;
        let params = json!({
            "name": "ping",
            "in": "10s",
            "callback_kind": "store",
            "payload": {"k": 1},
        });
        let result = schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        assert_eq!(result["success"], json!(true));
    }

    #[tokio::test]
    async fn schedule_recurring_rejects_every_minute_cron() {
        let state = test_state().await;
        let params = json!({
            "name": "heartbeat",
            "cron": "* * * * *",
            "callback_kind": "store",
        });
        let result = schedule_recurring(&state, params.as_object().unwrap(), "alice").await;
        assert_eq!(result["success"], json!(false));
    }

    #[tokio::test]
    async fn list_tasks_defaults_to_active_and_scopes_by_session() {
        let state = test_state().await;
        let params = json!({ "name": "a", "in": "1h", "callback_kind": "store" });
        schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        schedule_one_shot(&state, params.as_object().unwrap(), "bob").await;

        let result = list_tasks(&state, &Map::new(), "alice");
        assert_eq!(result["tasks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_task_rejects_unowned_task() {
        let state = test_state().await;
        let params = json!({ "name": "a", "in": "1h", "callback_kind": "store" });
        let created = schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        let id = created["task"]["id"].as_str().unwrap();

        let cancel_params = json!({ "id": id });
        let result = cancel_task(&state, cancel_params.as_object().unwrap(), "bob").await;
        assert_eq!(result["success"], json!(false));
    }

    #[tokio::test]
    async fn per_session_cap_rejects_once_full() {
        let mut config = tam_domain::config::Config::default();
        config.scheduler.max_active_tasks = 1;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::mem::forget(dir);
        let store = Arc::new(TaskStore::load(path).await.unwrap());
        let config = Arc::new(config);
        let worker = Arc::new(Worker::new(store.clone(), config.scheduler.clone(), config.safety.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let state = AppState { config, store, worker, rate_limiter };

        let params = json!({ "name": "a", "in": "1h", "callback_kind": "store" });
        let first = schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        assert_eq!(first["success"], json!(true));
        let second = schedule_one_shot(&state, params.as_object().unwrap(), "alice").await;
        assert_eq!(second["success"], json!(false));
    }
}
