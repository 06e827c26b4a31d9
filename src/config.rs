use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::accrual::AccrualClientConfig;
use crate::services::ReconcilerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub reconciliation: ReconciliationConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP API (host:port)
    pub address: String,
    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccrualConfig {
    /// Base URL of the accrual authority
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Cooldown used when a 429 carries no usable Retry-After
    pub default_retry_after_secs: u64,
    /// Longest cooldown honored from a Retry-After header
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

fn default_max_retry_after_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; empty selects the in-memory store
    #[serde(default)]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub poll_interval_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub error_queue_capacity: usize,
    pub error_report_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Key for signing session tokens
    pub secret_key: String,
    pub token_ttl_hours: u64,
    /// PBKDF2 rounds for new password hashes
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

fn default_password_iterations() -> u32 {
    100_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("server.address", "localhost:8081")?
            .set_default("server.max_body_bytes", 64 * 1024)?
            .set_default("accrual.base_url", "http://localhost:8080")?
            .set_default("accrual.request_timeout_ms", 5000)?
            .set_default("accrual.default_retry_after_secs", 60)?
            .set_default("accrual.max_retry_after_secs", 3600)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("reconciliation.poll_interval_ms", 1000)?
            .set_default("reconciliation.workers", 16)?
            .set_default("reconciliation.queue_capacity", 1024)?
            .set_default("reconciliation.error_queue_capacity", 1024)?
            .set_default("reconciliation.error_report_timeout_ms", 1000)?
            .set_default("auth.secret_key", "")?
            .set_default("auth.token_ttl_hours", 96)?
            .set_default("auth.password_iterations", 100_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LEDGER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LEDGER__SERVER__ADDRESS, etc.)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.normalize();
        Ok(config)
    }

    /// Configuration with built-in defaults, for tests and `--in-memory` runs
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                address: "localhost:8081".to_string(),
                max_body_bytes: default_max_body_bytes(),
            },
            accrual: AccrualConfig {
                base_url: "http://localhost:8080".to_string(),
                request_timeout_ms: 5000,
                default_retry_after_secs: 60,
                max_retry_after_secs: default_max_retry_after_secs(),
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: default_max_connections(),
            },
            reconciliation: ReconciliationConfig {
                poll_interval_ms: 1000,
                workers: 16,
                queue_capacity: 1024,
                error_queue_capacity: 1024,
                error_report_timeout_ms: 1000,
            },
            auth: AuthConfig {
                secret_key: String::new(),
                token_ttl_hours: 96,
                password_iterations: default_password_iterations(),
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Strip trailing slashes from URLs and trim addresses
    pub fn normalize(&mut self) {
        self.server.address = self.server.address.trim().to_string();
        self.accrual.base_url = self.accrual.base_url.trim().trim_end_matches('/').to_string();
        self.database.url = self.database.url.trim().to_string();
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.address.is_empty() {
            errors.push("server.address must be set".to_string());
        }

        if self.accrual.base_url.is_empty() {
            errors.push("accrual.base_url must be set".to_string());
        }

        if self.accrual.max_retry_after_secs < self.accrual.default_retry_after_secs {
            errors.push(
                "accrual.max_retry_after_secs must not be below default_retry_after_secs"
                    .to_string(),
            );
        }

        if self.reconciliation.workers == 0 {
            errors.push("reconciliation.workers must be positive".to_string());
        }

        if self.reconciliation.queue_capacity == 0 {
            errors.push("reconciliation.queue_capacity must be positive".to_string());
        }

        if self.reconciliation.error_queue_capacity == 0 {
            errors.push("reconciliation.error_queue_capacity must be positive".to_string());
        }

        if self.reconciliation.poll_interval_ms == 0 {
            errors.push("reconciliation.poll_interval_ms must be positive".to_string());
        }

        if self.auth.secret_key.is_empty() {
            errors.push("auth.secret_key must be set".to_string());
        }

        if self.auth.token_ttl_hours == 0 {
            errors.push("auth.token_ttl_hours must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn accrual_client_config(&self) -> AccrualClientConfig {
        AccrualClientConfig {
            base_url: self.accrual.base_url.clone(),
            request_timeout: Duration::from_millis(self.accrual.request_timeout_ms),
            default_retry_after: Duration::from_secs(self.accrual.default_retry_after_secs),
            max_retry_after: Duration::from_secs(self.accrual.max_retry_after_secs),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let r = &self.reconciliation;
        ReconcilerConfig {
            poll_interval: Duration::from_millis(r.poll_interval_ms),
            workers: r.workers,
            queue_capacity: r.queue_capacity,
            error_queue_capacity: r.error_queue_capacity,
            error_report_timeout: Duration::from_millis(r.error_report_timeout_ms),
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.token_ttl_hours * 3600)
    }
}
