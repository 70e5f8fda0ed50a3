//! Application configuration
//!
//! Settings are layered: built-in defaults, then an optional config file
//! (any format the `config` crate understands), then `RESTOCK_WATCH__*`
//! environment variables with `__` between nested keys, e.g.
//! `RESTOCK_WATCH__HTTP__TIMEOUT_SECONDS=20`. The legacy variables
//! `PUSHOVER_USER_KEY`, `PUSHOVER_API_TOKEN` and `CHECK_INTERVAL_MINUTES`
//! are applied last.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::infrastructure::http_client::HttpClientConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "RESTOCK_WATCH_CONFIG";
/// Config file used when no path is given (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "config/restock-watch";

const ENV_PREFIX: &str = "RESTOCK_WATCH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Environment variable error: {message}")]
    Environment { message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpClientConfig,
    pub schedule: ScheduleConfig,
    pub pushover: PushoverConfig,
    pub logging: LoggingConfig,
    /// Products upserted into the store at startup
    pub products: Vec<ProductSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir().map_or_else(
            || PathBuf::from("data").join(defaults::DATABASE_FILE),
            |dir| dir.join(defaults::APP_DIR).join(defaults::DATABASE_FILE),
        );
        Self { path }
    }
}

/// Check cadences. An interval of 0 pauses that cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub availability_interval_minutes: u64,
    pub price_interval_minutes: u64,
    /// Pause between consecutive product fetches within a cycle
    pub inter_product_delay_ms: u64,
    /// Run one availability cycle before the timers start
    pub run_on_startup: bool,
    /// How often a running daemon re-reads persisted interval settings
    pub settings_poll_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            availability_interval_minutes: defaults::CHECK_INTERVAL_MINUTES,
            price_interval_minutes: defaults::CHECK_INTERVAL_MINUTES,
            inter_product_delay_ms: defaults::INTER_PRODUCT_DELAY_MS,
            run_on_startup: true,
            settings_poll_seconds: defaults::SETTINGS_POLL_SECONDS,
        }
    }
}

impl ScheduleConfig {
    pub const fn inter_product_delay(&self) -> Duration {
        Duration::from_millis(self.inter_product_delay_ms)
    }

    pub const fn settings_poll_interval(&self) -> Duration {
        Duration::from_secs(self.settings_poll_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushoverConfig {
    pub user_key: String,
    pub api_token: String,
    pub api_url: String,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            user_key: String::new(),
            api_token: String::new(),
            api_url: defaults::PUSHOVER_API_URL.to_string(),
        }
    }
}

impl PushoverConfig {
    pub fn is_configured(&self) -> bool {
        !self.user_key.trim().is_empty() && !self.api_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files. Defaults to `logs/` next to the executable.
    pub directory: Option<PathBuf>,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: std::collections::HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            directory: None,
            module_filters: std::collections::HashMap::new(),
        }
    }
}

/// A product to track, as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSeed {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl AppConfig {
    /// Load from the given file (optional) plus environment overrides
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let check_interval = legacy_interval()?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("pushover.user_key", std::env::var("PUSHOVER_USER_KEY").ok())?
            .set_override_option("pushover.api_token", std::env::var("PUSHOVER_API_TOKEN").ok())?
            .set_override_option("schedule.availability_interval_minutes", check_interval)?
            .set_override_option("schedule.price_interval_minutes", check_interval)?
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "http.timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.http.max_requests_per_second == 0 {
            return Err(ConfigError::Validation {
                message: "http.max_requests_per_second must be greater than 0".to_string(),
            });
        }

        for (key, minutes) in [
            ("availability_interval_minutes", self.schedule.availability_interval_minutes),
            ("price_interval_minutes", self.schedule.price_interval_minutes),
        ] {
            if minutes > defaults::MAX_INTERVAL_MINUTES {
                return Err(ConfigError::Validation {
                    message: format!(
                        "schedule.{key} must be at most {}",
                        defaults::MAX_INTERVAL_MINUTES
                    ),
                });
            }
        }

        if self.schedule.settings_poll_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "schedule.settings_poll_seconds must be greater than 0".to_string(),
            });
        }

        if let Some(seed) = self
            .products
            .iter()
            .find(|p| !(p.url.starts_with("http://") || p.url.starts_with("https://")))
        {
            return Err(ConfigError::Validation {
                message: format!("product url must be http(s): '{}'", seed.url),
            });
        }

        Ok(())
    }
}

fn legacy_interval() -> Result<Option<u64>, ConfigError> {
    match std::env::var("CHECK_INTERVAL_MINUTES") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Environment {
                message: format!("CHECK_INTERVAL_MINUTES must be a whole number, got '{raw}'"),
            }),
        Err(_) => Ok(None),
    }
}

/// Default configuration values
pub mod defaults {
    /// Directory name under the platform data directory
    pub const APP_DIR: &str = "restock-watch";

    /// SQLite database file name
    pub const DATABASE_FILE: &str = "restock-watch.db";

    /// Default minutes between cycles of each cadence
    pub const CHECK_INTERVAL_MINUTES: u64 = 5;

    /// Longest accepted cadence interval (30 days)
    pub const MAX_INTERVAL_MINUTES: u64 = 43_200;

    /// Default pause between product fetches in milliseconds
    pub const INTER_PRODUCT_DELAY_MS: u64 = 1000;

    /// Default seconds between persisted-settings polls
    pub const SETTINGS_POLL_SECONDS: u64 = 30;

    pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.schedule.availability_interval_minutes, 5);
        assert_eq!(config.schedule.inter_product_delay(), Duration::from_secs(1));
        assert!(!config.pushover.is_configured());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = AppConfig::default();
        config.http.timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_oversized_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.schedule.price_interval_minutes = defaults::MAX_INTERVAL_MINUTES + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        config.schedule.price_interval_minutes = defaults::MAX_INTERVAL_MINUTES;
        config.validate().unwrap();
    }

    #[test]
    fn test_non_http_product_is_rejected() {
        let mut config = AppConfig::default();
        config.products.push(ProductSeed {
            url: "ftp://store.ui.com/x".into(),
            name: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[schedule]
price_interval_minutes = 0

[pushover]
user_key = "u-key"
api_token = "a-token"

[[products]]
url = "https://store.ui.com/us/en/products/udr"
name = "Dream Router"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.schedule.price_interval_minutes, 0);
        assert_eq!(config.products.len(), 1);
        assert_eq!(config.products[0].name.as_deref(), Some("Dream Router"));
        assert_eq!(config.http.timeout_seconds, 30);
    }
}
