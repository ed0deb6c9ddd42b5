//! HTTP Facade handlers — health probe, tool catalog, tool-execute,
//! JSON-RPC 2.0 endpoint, and the stored-notification pull endpoint.
//! Everything here is a thin adapter onto `api::tools`; the facade
//! itself never touches the store directly.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::api::tools;
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// The 7 named tool operations, with a short description and an
/// input-schema sketch for `tools/list` / `list_tools`.
pub fn tool_catalog() -> Vec<Value> {
    let tool = |name: &str, description: &str, required: &[&str]| {
        json!({
            "name": name,
            "description": description,
            "inputSchema": {
                "type": "object",
                "required": required,
            },
        })
    };
    vec![
        tool(
            "schedule_one_shot",
            "Schedule a task to fire once at an absolute or relative time.",
            &["name", "callback_kind"],
        ),
        tool(
            "schedule_recurring",
            "Schedule a task to fire repeatedly on a cron expression.",
            &["name", "cron", "callback_kind"],
        ),
        tool("list_tasks", "List tasks owned by the caller's session.", &[]),
        tool("get_task", "Fetch a single task, optionally with execution history.", &["id"]),
        tool("cancel_task", "Cancel an active or paused task.", &["id"]),
        tool("pause_task", "Pause an active task.", &["id"]),
        tool("resume_task", "Resume a paused task.", &["id"]),
    ]
}

async fn dispatch_tool(state: &AppState, tool_name: &str, params: &Map<String, Value>, session_id: &str) -> Value {
    match tool_name {
        "schedule_one_shot" => tools::schedule_one_shot(state, params, session_id).await,
        "schedule_recurring" => tools::schedule_recurring(state, params, session_id).await,
        "list_tasks" => tools::list_tasks(state, params, session_id),
        "get_task" => tools::get_task(state, params),
        "cancel_task" => tools::cancel_task(state, params, session_id).await,
        "pause_task" => tools::pause_task(state, params, session_id).await,
        "resume_task" => tools::resume_task(state, params, session_id).await,
        other => json!({ "success": false, "error": format!("unknown tool '{other}'") }),
    }
}

// ── Health ───────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── List tools ───────────────────────────────────────────────────────

pub async fn list_tools() -> Json<Value> {
    Json(json!({ "tools": tool_catalog() }))
}

// ── Execute tool (tool-execute endpoint, §6) ───────────────────────────

#[derive(Debug, Deserialize)]
pub struct ToolContext {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    pub context: ToolContext,
}

pub async fn execute_tool(State(state): State<AppState>, Json(req): Json<ExecuteToolRequest>) -> Json<Value> {
    let params = req.params.as_object().cloned().unwrap_or_default();
    Json(dispatch_tool(&state, &req.tool, &params, &req.context.session_id).await)
}

// ── JSON-RPC 2.0 endpoint (§6) ───────────────────────────────────────

const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn rpc_ok(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_err(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": RpcError { code, message: message.into() } })
}

pub async fn rpc(State(state): State<AppState>, body: axum::body::Bytes) -> Json<Value> {
    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return Json(rpc_err(&Value::Null, INVALID_REQUEST, "invalid request")),
    };

    if req.jsonrpc.as_deref() != Some("2.0") {
        return Json(rpc_err(&req.id, INVALID_REQUEST, "jsonrpc version must be \"2.0\""));
    }

    let result = match req.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": { "name": "temporal-agent-mcp", "version": "1.0" },
            "capabilities": { "tools": {} },
        })),
        "tools/list" => Ok(json!({ "tools": tool_catalog() })),
        "tools/call" => match handle_tools_call(&state, &req.params).await {
            Ok(v) => Ok(v),
            Err(message) => Err((INVALID_REQUEST, message)),
        },
        _ => Err((METHOD_NOT_FOUND, format!("unknown method '{}'", req.method))),
    };

    Json(match result {
        Ok(value) => rpc_ok(&req.id, value),
        Err((code, message)) if code == INVALID_REQUEST => rpc_err(&req.id, code, message),
        Err((_, message)) => rpc_err(&req.id, INTERNAL_ERROR, message),
    })
}

/// `tools/call` params per §6: `{name, arguments}`. The wire shape
/// carries no session context slot, so the caller's session id rides
/// along as `arguments.sessionId` (falling back to `"anonymous"`).
async fn handle_tools_call(state: &AppState, params: &Value) -> Result<Value, String> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| "params.name is required".to_string())?;
    let arguments = params.get("arguments").and_then(Value::as_object).cloned().unwrap_or_default();
    let session_id = arguments.get("sessionId").and_then(Value::as_str).unwrap_or("anonymous").to_string();

    let result = dispatch_tool(state, name, &arguments, &session_id).await;
    Ok(json!({
        "content": [{ "type": "text", "text": result.to_string() }],
        "isError": result.get("success").and_then(Value::as_bool).map(|ok| !ok).unwrap_or(false),
    }))
}

// ── Stored notifications pull endpoint ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PullNotificationsQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub include_read: bool,
}

pub async fn pull_notifications(
    State(state): State<AppState>,
    axum::extract::Query(q): axum::extract::Query<PullNotificationsQuery>,
) -> Json<Value> {
    let notifications = state.store.pull_notifications(&q.session_id, q.include_read);
    Json(json!({ "success": true, "notifications": notifications }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_catalog_lists_all_seven_operations() {
        let names: Vec<String> =
            tool_catalog().into_iter().map(|t| t["name"].as_str().unwrap().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "schedule_one_shot",
                "schedule_recurring",
                "list_tasks",
                "get_task",
                "cancel_task",
                "pause_task",
                "resume_task",
            ]
        );
    }
}
