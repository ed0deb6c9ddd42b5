use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiter configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed-window rate limiter in front of the tool surface. Keyed by
/// client IP, never by a client-supplied identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_window_secs")]
    pub window_secs: u64,
    #[serde(default = "d_cap")]
    pub cap: u32,
    /// How often the background sweep removes expired windows.
    #[serde(default = "d_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: d_window_secs(),
            cap: d_cap(),
            sweep_interval_secs: d_sweep_secs(),
        }
    }
}

fn d_window_secs() -> u64 {
    15 * 60
}
fn d_cap() -> u32 {
    100
}
fn d_sweep_secs() -> u64 {
    5 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RateLimitConfig::default();
        assert_eq!(cfg.window_secs, 900);
        assert_eq!(cfg.cap, 100);
        assert_eq!(cfg.sweep_interval_secs, 300);
    }
}
