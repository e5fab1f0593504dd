//! Application configuration loading from config.toml
//!
//! Every section is optional; a missing file yields the defaults so the service can
//! start with nothing but environment variables. `DATABASE_URL` and `BIND_ADDR`
//! override the file when set.

use crate::{
    core::schedule::ScheduleLimits,
    errors::{Error, Result},
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "CLASS_BUDDY_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Database location
    pub database: DatabaseConfig,
    /// Schedule expansion settings
    pub schedule: ScheduleConfig,
    /// Session reminder sweep settings
    pub reminders: ReminderConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API listens on
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SeaORM` connection URL
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: super::database::DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// `[schedule]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Occurrence cap used for open-ended plans that do not set their own
    pub default_max_instances: u32,
    /// Plans that would expand past this many sessions are rejected
    pub max_plan_instances: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let limits = ScheduleLimits::DEFAULT;
        Self {
            default_max_instances: limits.default_max_instances,
            max_plan_instances: limits.max_plan_instances,
        }
    }
}

impl ScheduleConfig {
    /// Limits handed to `attach_schedule`
    #[must_use]
    pub const fn limits(&self) -> ScheduleLimits {
        ScheduleLimits {
            default_max_instances: self.default_max_instances,
            max_plan_instances: self.max_plan_instances,
        }
    }
}

/// `[reminders]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// How long before a session starts its reminder becomes due
    pub lead_minutes: i64,
    /// Interval of the background status/reminder sweep
    pub sweep_interval_secs: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lead_minutes: 60,
            sweep_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Applies `DATABASE_URL` / `BIND_ADDR` overrides from the environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        self
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    debug!("Loading configuration from: {:?}", path.as_ref());
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses configuration from TOML text
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from `$CLASS_BUDDY_CONFIG` or ./config.toml, falling back to
/// defaults when the file does not exist, then applies environment overrides.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = if Path::new(&path).exists() {
        load_config(&path)?
    } else {
        info!("No config file at {path}, using defaults");
        AppConfig::default()
    };
    Ok(config.with_env_overrides())
}
