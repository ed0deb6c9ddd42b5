//! Core durable entities: `Task`, `Execution`, `StoredNotification`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `kind = one_shot` fires once at `fire_at`; `kind = recurring` fires
/// on `cron` (in `timezone`) and keeps re-arming `next_fire_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    OneShot,
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// Closed set of callback kinds — see `tam_gateway::runtime::dispatch`
/// for the implementations. Kept closed per design: a dispatcher is
/// looked up by this tag, never by open-ended trait-object registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Webhook,
    Chat,
    Email,
    Store,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Webhook => "webhook",
            CallbackKind::Chat => "chat",
            CallbackKind::Email => "email",
            CallbackKind::Store => "store",
        }
    }
}

/// A durable scheduled unit. See invariants in `Task::check_invariants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: TaskKind,

    // One-shot scheduling.
    pub fire_at: Option<DateTime<Utc>>,

    // Recurring scheduling.
    pub cron: Option<String>,
    pub timezone: String,
    pub next_fire_at: Option<DateTime<Utc>>,

    pub callback_kind: CallbackKind,
    pub callback_config: HashMap<String, String>,

    /// Arbitrary JSON-shaped mapping, bounded by `SafetyConfig::max_payload_size`.
    pub payload: serde_json::Map<String, serde_json::Value>,

    pub status: TaskStatus,

    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub current_retry_count: u32,

    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,

    pub created_by: String,
    pub tags: HashSet<String>,

    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether this task currently satisfies the lease-eligibility
    /// invariant: `status = active ∧ locked_at = ∅`.
    pub fn is_lease_eligible(&self) -> bool {
        self.status == TaskStatus::Active && self.locked_at.is_none()
    }

    /// The instant this task is next due, for `one_shot` or `recurring`
    /// alike — mirrors `coalesce(next_fire_at, fire_at)` from the due-task
    /// ordering predicate.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.next_fire_at.or(self.fire_at)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_lease_eligible() && self.due_at().is_some_and(|t| t <= now)
    }
}

/// An immutable record of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    /// Truncated to <= 1000 bytes, see `truncate_body`.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub retry_number: u32,
    pub request_url: Option<String>,
    pub request_payload: serde_json::Value,
}

pub const MAX_RESPONSE_BODY_BYTES: usize = 1000;

/// Truncate a response body to the byte cap, respecting UTF-8 char
/// boundaries so we never produce an invalid string.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_RESPONSE_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_RESPONSE_BODY_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Payload delivered when `callback_kind = store`, awaiting pull by
/// the owning session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub fired_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_respects_cap() {
        let long = "x".repeat(2000);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.len(), MAX_RESPONSE_BODY_BYTES);
    }

    #[test]
    fn truncate_body_noop_when_short() {
        assert_eq!(truncate_body("hello"), "hello");
    }

    #[test]
    fn truncate_body_respects_utf8_boundary() {
        // 500 two-byte chars = 1000 bytes exactly at the boundary already,
        // add one more multi-byte char to force a boundary adjustment.
        let s: String = std::iter::repeat('é').take(501).collect();
        let truncated = truncate_body(&s);
        assert!(truncated.len() <= MAX_RESPONSE_BODY_BYTES);
        assert!(String::from_utf8(truncated.into_bytes()).is_ok());
    }

    #[test]
    fn lease_eligibility_requires_active_and_unlocked() {
        let mut t = sample_task();
        assert!(t.is_lease_eligible());
        t.locked_at = Some(Utc::now());
        assert!(!t.is_lease_eligible());
        t.locked_at = None;
        t.status = TaskStatus::Paused;
        assert!(!t.is_lease_eligible());
    }

    fn sample_task() -> Task {
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
            callback_config: HashMap::new(),
            payload: serde_json::Map::new(),
            status: TaskStatus::Active,
            max_retries: 3,
            retry_delay_seconds: 60,
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: "anonymous".into(),
            tags: HashSet::new(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
