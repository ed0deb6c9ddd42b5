//! Runtime — the scheduling engine: time/cron evaluation, the safety
//! layer, the durable store, callback dispatchers, the scheduler
//! worker, and the rate limiter.

pub mod cron;
pub mod dispatch;
pub mod rate_limit;
pub mod safety;
pub mod store;
pub mod worker;
