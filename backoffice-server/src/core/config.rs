use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::auth::JwtConfig;
use crate::observability::ReplayConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    MissingInProduction(&'static str),

    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration
///
/// # Environment
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | ./data | database and log directory |
/// | HTTP_PORT | 3000 | listen port |
/// | ENVIRONMENT | development | development / staging / production |
/// | LOG_LEVEL | info | default filter when RUST_LOG is unset |
/// | LOG_JSON | false | JSON log lines |
/// | LOG_DIR | unset | daily rolling log files |
/// | REQUEST_TIMEOUT_MS | 30000 | handler deadline |
/// | JWT_SECRET / JWT_ISSUER / JWT_AUDIENCE | dev key / backoffice | token verification |
/// | CURRENCY | EUR | venue currency |
/// | KDS_UNDO_WINDOW_SECONDS | 30 | default station undo window |
/// | ACTION_TOKEN_TTL_SECONDS | 60 | replay token lifetime |
/// | REPLAY_BASE_URL | http://127.0.0.1:{HTTP_PORT} | replay target |
/// | REPLAY_ALLOWED_PATHS | /api/pos,/api/inventory,/api/kds | replay allow-list |
/// | CAPTURE_REDACT_FIELDS | password,pin,... | PII deny-list |
/// | PAYROLL_BANDS_PATH | unset | default payroll parameters |
/// | DISABLED_MODULES | unset | `venue:module` pairs |
/// | PROCUREMENT_WEBHOOK_URL | unset | LOW_STOCK receiver |
/// | ALERT_WEBHOOK_URL | unset | alert receiver |
/// | OUTBOX_POLL_MS | 2000 | outbox worker interval |
/// | LEDGER_VERIFY_INTERVAL_SECS | 3600 | chain verification interval |
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    pub http_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    pub request_timeout_ms: u64,
    pub jwt: JwtConfig,
    pub currency: String,
    pub kds_undo_window_seconds: u32,
    pub replay: ReplayConfig,
    pub replay_base_url: String,
    pub payroll_bands_path: Option<String>,
    pub disabled_modules: String,
    pub procurement_webhook_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub outbox_poll_ms: u64,
    pub ledger_verify_interval_secs: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_opt(name).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load from the environment, after `.env` if present
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let http_port = env_or("HTTP_PORT", 3000u16);
        let defaults = ReplayConfig::default();
        let replay = ReplayConfig {
            redact_fields: env_list("CAPTURE_REDACT_FIELDS").unwrap_or(defaults.redact_fields),
            allowed_paths: env_list("REPLAY_ALLOWED_PATHS").unwrap_or(defaults.allowed_paths),
            token_ttl_seconds: env_or("ACTION_TOKEN_TTL_SECONDS", defaults.token_ttl_seconds),
        };

        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data".into()),
            http_port,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("LOG_JSON", false),
            log_dir: env_opt("LOG_DIR"),
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30_000),
            jwt: JwtConfig::from_env(),
            currency: std::env::var("CURRENCY").unwrap_or_else(|_| "EUR".into()),
            kds_undo_window_seconds: env_or("KDS_UNDO_WINDOW_SECONDS", 30),
            replay,
            replay_base_url: env_opt("REPLAY_BASE_URL")
                .unwrap_or_else(|| format!("http://127.0.0.1:{http_port}")),
            payroll_bands_path: env_opt("PAYROLL_BANDS_PATH"),
            disabled_modules: std::env::var("DISABLED_MODULES").unwrap_or_default(),
            procurement_webhook_url: env_opt("PROCUREMENT_WEBHOOK_URL"),
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            outbox_poll_ms: env_or("OUTBOX_POLL_MS", 2_000),
            ledger_verify_interval_secs: env_or("LEDGER_VERIFY_INTERVAL_SECS", 3_600),
        }
    }

    /// Configuration for tests: defaults only, nothing read from the
    /// environment
    pub fn for_tests(work_dir: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            http_port: 0,
            environment: "test".into(),
            log_level: "debug".into(),
            log_json: false,
            log_dir: None,
            request_timeout_ms: 30_000,
            jwt: JwtConfig::default(),
            currency: "EUR".into(),
            kds_undo_window_seconds: 30,
            replay: ReplayConfig::default(),
            replay_base_url: "http://127.0.0.1:0".into(),
            payroll_bands_path: None,
            disabled_modules: String::new(),
            procurement_webhook_url: None,
            alert_webhook_url: None,
            outbox_poll_ms: 2_000,
            ledger_verify_interval_secs: 3_600,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.jwt.is_development_key() {
            return Err(ConfigError::MissingInProduction("JWT_SECRET"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid {
                name: "CURRENCY",
                reason: format!("'{}' is not an ISO 4217 code", self.currency),
            });
        }
        if self.kds_undo_window_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "KDS_UNDO_WINDOW_SECONDS",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("backoffice.redb")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
