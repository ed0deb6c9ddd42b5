use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler worker configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning knobs for the poll/lease/reap loop. Mirrors
/// `SCHEDULER_POLL_INTERVAL`, `SCHEDULER_BATCH_SIZE`,
/// `SCHEDULER_LOCK_TIMEOUT`, `MAX_ACTIVE_TASKS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll ticks.
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max due tasks fetched per poll tick.
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
    /// Seconds a lease may be held before the reaper frees it.
    #[serde(default = "d_lock_timeout")]
    pub lock_timeout_secs: i64,
    /// Seconds between reaper ticks.
    #[serde(default = "d_reaper_interval")]
    pub reaper_interval_secs: u64,
    /// Per-session cap on active+paused tasks.
    #[serde(default = "d_max_active")]
    pub max_active_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_poll_interval(),
            batch_size: d_batch_size(),
            lock_timeout_secs: d_lock_timeout(),
            reaper_interval_secs: d_reaper_interval(),
            max_active_tasks: d_max_active(),
        }
    }
}

impl SchedulerConfig {
    /// Clamp to sane operational bounds.
    pub fn clamped(&self) -> Self {
        Self {
            poll_interval_secs: self.poll_interval_secs.clamp(1, 3600),
            batch_size: self.batch_size.clamp(1, 1000),
            lock_timeout_secs: self.lock_timeout_secs.clamp(1, 86_400),
            reaper_interval_secs: self.reaper_interval_secs.clamp(1, 3600),
            max_active_tasks: self.max_active_tasks.clamp(1, 100_000),
        }
    }
}

fn d_poll_interval() -> u64 {
    10
}
fn d_batch_size() -> usize {
    50
}
fn d_lock_timeout() -> i64 {
    60
}
fn d_reaper_interval() -> u64 {
    300
}
fn d_max_active() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.poll_interval_secs, 10);
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.lock_timeout_secs, 60);
        assert_eq!(cfg.reaper_interval_secs, 300);
        assert_eq!(cfg.max_active_tasks, 100);
    }

    #[test]
    fn clamp_rejects_zero_poll_interval() {
        let cfg = SchedulerConfig {
            poll_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(cfg.clamped().poll_interval_secs, 1);
    }

    #[test]
    fn clamp_caps_batch_size() {
        let cfg = SchedulerConfig {
            batch_size: 10_000,
            ..SchedulerConfig::default()
        };
        assert_eq!(cfg.clamped().batch_size, 1000);
    }
}
