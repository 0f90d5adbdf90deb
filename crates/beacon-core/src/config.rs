use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PAGE_SIZE: u32 = 250;
// Empirical values: long enough for the catalog index to commit a write.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 350;
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Top-level config (beacon.toml + BEACON_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment,
/// e.g. `BEACON_RETRY__MAX_ATTEMPTS=6`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Email delivery is only registered when this section is present.
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound for a single re-execution of a stored query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Maximum number of results fetched per tick.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub registry: RegistryBackend,
    /// SQLite file shared by every process using the `sqlite` registry.
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            page_size: DEFAULT_PAGE_SIZE,
            registry: RegistryBackend::default(),
            database_path: default_db_path(),
        }
    }
}

/// Where the running-job registry lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// Process-local map; only correct for a single-process deployment.
    #[default]
    Memory,
    /// SQLite table shared by every process pointing at the same file.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// SMTP settings for the email delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Address that scheduled result emails are sent from.
    pub sender: String,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/beacon.db", home)
}

impl BeaconConfig {
    /// Load config from a TOML file with BEACON_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.beacon/beacon.toml
    ///
    /// A missing file is not an error; every setting has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("BEACON_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: BeaconConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if config.retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/beacon.toml", home)
}
