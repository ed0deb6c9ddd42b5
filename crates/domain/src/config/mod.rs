mod rate_limit;
mod safety;
mod scheduler;
mod server;
mod workspace;

pub use rate_limit::*;
pub use safety::*;
pub use scheduler::*;
pub use server::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the gateway needs, assembled once at startup from
/// environment variables (see `Config::from_env`). Immutable for the
/// lifetime of the process — no hot reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Build a `Config` from the enumerated environment variables,
    /// falling back to compiled-in defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("PORT") {
            if let Ok(p) = v.parse() {
                cfg.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("HOST") {
            cfg.server.host = v;
        }
        if let Ok(v) = std::env::var("SCHEDULER_POLL_INTERVAL") {
            if let Ok(p) = v.parse() {
                cfg.scheduler.poll_interval_secs = p;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_BATCH_SIZE") {
            if let Ok(p) = v.parse() {
                cfg.scheduler.batch_size = p;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_LOCK_TIMEOUT") {
            if let Ok(p) = v.parse() {
                cfg.scheduler.lock_timeout_secs = p;
            }
        }
        if let Ok(v) = std::env::var("MAX_ACTIVE_TASKS") {
            if let Ok(p) = v.parse() {
                cfg.scheduler.max_active_tasks = p;
            }
        }
        if let Ok(v) = std::env::var("MAX_PAYLOAD_SIZE") {
            if let Ok(p) = v.parse() {
                cfg.safety.max_payload_size = p;
            }
        }
        if let Ok(v) = std::env::var("WEBHOOK_TIMEOUT") {
            if let Ok(p) = v.parse() {
                cfg.safety.webhook_timeout_secs = p;
            }
        }
        if let Ok(v) = std::env::var("WEBHOOK_MAX_RETRIES") {
            if let Ok(p) = v.parse() {
                cfg.safety.webhook_max_retries = p;
            }
        }
        if let Ok(v) = std::env::var("HMAC_SECRET") {
            cfg.safety.hmac_secret = v;
        }
        if let Ok(v) = std::env::var("ALLOWED_WEBHOOK_DOMAINS") {
            cfg.safety.allowed_webhook_domains = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        let node_env = std::env::var("NODE_ENV")
            .or_else(|_| std::env::var("TAM_ENV"))
            .unwrap_or_default();
        cfg.safety.environment = Environment::from_env_str(&node_env);

        cfg.scheduler = cfg.scheduler.clamped();
        cfg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Empty
    /// means nothing to report.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        if self.scheduler.poll_interval_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.poll_interval_secs".into(),
                message: "poll interval must be greater than 0".into(),
            });
        }
        if self.scheduler.batch_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.batch_size".into(),
                message: "batch size must be greater than 0".into(),
            });
        }
        if self.scheduler.lock_timeout_secs <= 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.lock_timeout_secs".into(),
                message: "lock timeout must be greater than 0".into(),
            });
        }

        if self.safety.max_payload_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "safety.max_payload_size".into(),
                message: "max payload size must be greater than 0".into(),
            });
        }
        if self.safety.webhook_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "safety.webhook_timeout_secs".into(),
                message: "webhook timeout must be greater than 0".into(),
            });
        }
        if self.safety.hmac_secret.is_empty() {
            let severity = if self.safety.environment.is_production() {
                ConfigSeverity::Error
            } else {
                ConfigSeverity::Warning
            };
            errors.push(ConfigError {
                severity,
                field: "safety.hmac_secret".into(),
                message: "HMAC_SECRET is unset — outbound webhook signatures will use an empty key"
                    .into(),
            });
        }
        for (i, domain) in self.safety.allowed_webhook_domains.iter().enumerate() {
            if domain.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("safety.allowed_webhook_domains[{i}]"),
                    message: "domain entry must not be empty".into(),
                });
            }
        }

        if self.rate_limit.window_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rate_limit.window_secs".into(),
                message: "window_secs must be greater than 0".into(),
            });
        }
        if self.rate_limit.cap == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rate_limit.cap".into(),
                message: "cap must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn default_config_has_only_hmac_warning() {
        let issues = Config::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
        assert!(find_issue(&issues, "safety.hmac_secret").is_some());
    }

    #[test]
    fn production_without_hmac_secret_is_error() {
        let mut cfg = Config::default();
        cfg.safety.environment = Environment::Production;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "safety.hmac_secret").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issue = find_issue(&cfg.validate(), "server.port").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn scheduler_zero_batch_size_is_error() {
        let mut cfg = Config::default();
        cfg.scheduler.batch_size = 0;
        let issue = find_issue(&cfg.validate(), "scheduler.batch_size").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn rate_limit_zero_cap_is_error() {
        let mut cfg = Config::default();
        cfg.rate_limit.cap = 0;
        let issue = find_issue(&cfg.validate(), "rate_limit.cap").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issue = find_issue(&cfg.validate(), "server.cors.allowed_origins").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
