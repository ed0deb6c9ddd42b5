//! HTTP Facade (§4.7) — the external boundary. Every route lives
//! under `/mcp`; content-type enforcement, the 1 MB body cap, and the
//! rate-limit gate apply to the whole prefix.

pub mod facade;
pub mod middleware;
pub mod tools;

use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let mcp = Router::new()
        .route("/health", get(facade::health))
        .route("/tools", get(facade::list_tools))
        .route("/tools/execute", post(facade::execute_tool))
        .route("/rpc", post(facade::rpc))
        .route("/notifications", get(facade::pull_notifications))
        .layer(axum_middleware::from_fn(middleware::require_json_content_type))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new().nest("/mcp", mcp)
}
