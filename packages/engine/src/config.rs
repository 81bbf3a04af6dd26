use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::DEFAULT_MODULE_REQUEST_TIMEOUT;
use crate::sandbox::SandboxLimits;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub event_subject: String,
    pub event_queue_group: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub engine: EngineSettings,
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{} must be a valid value", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            module_request_timeout: Duration::from_millis(parsed_var(
                "MODULE_REQUEST_TIMEOUT_MS",
                defaults.module_request_timeout.as_millis() as u64,
            )?),
            sandbox: SandboxLimits {
                timeout: Duration::from_millis(parsed_var(
                    "SCRIPT_TIMEOUT_MS",
                    defaults.sandbox.timeout.as_millis() as u64,
                )?),
                memory_limit: parsed_var("SCRIPT_MEMORY_LIMIT_BYTES", defaults.sandbox.memory_limit)?,
            },
            storage_keys: StorageKeyPolicy {
                min_len: parsed_var("STORAGE_KEY_MIN_LEN", defaults.storage_keys.min_len)?,
                ignored_prefix: env::var("STORAGE_KEY_IGNORED_PREFIX")
                    .ok()
                    .filter(|p| !p.is_empty()),
            },
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            event_subject: env::var("EVENT_SUBJECT").unwrap_or_else(|_| "events".to_string()),
            event_queue_group: env::var("EVENT_QUEUE_GROUP")
                .unwrap_or_else(|_| "event-workers".to_string()),
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 10)?,
            run_migrations: parsed_var("RUN_MIGRATIONS", true)?,
            engine,
        })
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub module_request_timeout: Duration,
    pub sandbox: SandboxLimits,
    pub storage_keys: StorageKeyPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            module_request_timeout: DEFAULT_MODULE_REQUEST_TIMEOUT,
            sandbox: SandboxLimits::default(),
            storage_keys: StorageKeyPolicy::default(),
        }
    }
}

/// Storage key validation applied by `storage.get` and `storage.set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeyPolicy {
    pub min_len: usize,
    /// Stripped once before measuring, e.g. `tmp:`.
    pub ignored_prefix: Option<String>,
}

impl Default for StorageKeyPolicy {
    fn default() -> Self {
        Self {
            min_len: 3,
            ignored_prefix: None,
        }
    }
}

impl StorageKeyPolicy {
    pub fn accepts(&self, key: &str) -> bool {
        let measured = self
            .ignored_prefix
            .as_deref()
            .and_then(|prefix| key.strip_prefix(prefix))
            .unwrap_or(key);
        measured.chars().count() >= self.min_len
    }
}
