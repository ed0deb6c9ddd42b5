use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety layer / webhook dispatch configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which deployment environment is running. Only `Production` has
/// behavioral meaning — it forces `https` in URL validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl Environment {
    pub fn from_env_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Knobs for the SSRF guard, payload cap, and HMAC signing used by the
/// safety layer and the webhook dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Maximum serialized payload size in bytes (`MAX_PAYLOAD_SIZE`).
    #[serde(default = "d_max_payload_size")]
    pub max_payload_size: usize,
    /// Per-request webhook timeout in seconds (`WEBHOOK_TIMEOUT`).
    #[serde(default = "d_webhook_timeout")]
    pub webhook_timeout_secs: u64,
    /// Retries before a recurring task is marked failed (`WEBHOOK_MAX_RETRIES`).
    #[serde(default = "d_webhook_max_retries")]
    pub webhook_max_retries: u32,
    /// HMAC signing secret (`HMAC_SECRET`). Empty in development is
    /// tolerated but flagged by `Config::validate`.
    #[serde(default)]
    pub hmac_secret: String,
    /// Allowed skew (seconds) between a signed timestamp and now.
    #[serde(default = "d_max_skew")]
    pub max_skew_secs: i64,
    /// Optional webhook domain allowlist (`ALLOWED_WEBHOOK_DOMAINS`,
    /// comma-separated). Empty means "no allowlist restriction".
    #[serde(default)]
    pub allowed_webhook_domains: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            max_payload_size: d_max_payload_size(),
            webhook_timeout_secs: d_webhook_timeout(),
            webhook_max_retries: d_webhook_max_retries(),
            hmac_secret: String::new(),
            max_skew_secs: d_max_skew(),
            allowed_webhook_domains: Vec::new(),
        }
    }
}

fn d_max_payload_size() -> usize {
    65536
}
fn d_webhook_timeout() -> u64 {
    30
}
fn d_webhook_max_retries() -> u32 {
    3
}
fn d_max_skew() -> i64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SafetyConfig::default();
        assert_eq!(cfg.max_payload_size, 65536);
        assert_eq!(cfg.webhook_timeout_secs, 30);
        assert_eq!(cfg.max_skew_secs, 300);
        assert!(!cfg.environment.is_production());
    }

    #[test]
    fn environment_parses_only_production_token() {
        assert!(Environment::from_env_str("production").is_production());
        assert!(Environment::from_env_str("PRODUCTION").is_production());
        assert!(!Environment::from_env_str("staging").is_production());
        assert!(!Environment::from_env_str("").is_production());
    }
}
