use std::sync::Arc;

use tam_domain::config::Config;

use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::store::TaskStore;
use crate::runtime::worker::Worker;

/// Shared application state threaded through every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<TaskStore>,
    pub worker: Arc<Worker>,
    pub rate_limiter: Arc<RateLimiter>,
}
