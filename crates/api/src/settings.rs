//! Server settings
//!
//! Loaded from an optional `proctor.toml` and `PROCTOR__*` environment
//! variables (e.g. `PROCTOR__SESSION__MAX_WARNINGS=5`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use session_policy::SessionConfig;

use crate::rate_limit::RateLimitConfig;
use crate::ApiError;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listen address
    pub bind_addr: String,

    /// SQLite URL; in-memory store when absent
    pub database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Timeout for each persistence call (milliseconds)
    pub store_timeout_ms: u64,

    /// Rate limit for single-frame uploads
    pub rate_limit: RateLimitConfig,

    /// Defaults for streaming sessions
    pub session: SessionConfig,

    /// Grace period for single-shot uploads (seconds)
    pub single_shot_expiry_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            database_url: None,
            log_level: "info".to_string(),
            json_logs: false,
            store_timeout_ms: 2000,
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            single_shot_expiry_seconds: 30,
        }
    }
}

impl Settings {
    /// Load from `proctor.toml` (if present) and the environment
    pub fn load() -> Result<Self, ApiError> {
        Self::load_from("proctor")
    }

    /// Load from the named config file (if present) and the environment
    pub fn load_from(file: &str) -> Result<Self, ApiError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("PROCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.session.validate()?;
        Ok(settings)
    }
}
