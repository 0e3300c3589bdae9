//! Application configuration loading and validation.
//!
//! The top-level `Config` aggregates logging, polling, publishing, transport
//! and target settings. It is loaded once at startup; on reload only the
//! `[[targets]]` array is re-read (see `core::coordinator::ConfigTargetSource`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};
use validator::Validate;

use super::config::{
    logger::LoggerConfig,
    poller::{PollerConfig, PublisherConfig},
    targets::Target,
};

pub mod logger;
pub mod poller;
pub mod targets;

const ENV_CONFIG_PATH: &str = "WLCBEE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/wlcbee/config.toml";

/// Timestamp used by the `print_*` macros before tracing is initialized.
pub fn early_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default()
}

/// Timestamped console lines for use before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
///
/// ```toml
/// [logger]
/// level = "info"
///
/// [poller]
/// timeout_ms = 3000
/// retries = 3
///
/// [publisher]
/// state_topic = "wireless/state"
/// stats_topic = "wireless/stats"
///
/// [transport]
/// host = "broker.local"
///
/// [[targets]]
/// address = "10.0.0.1"
/// community = "public"
/// ```
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub poller: PollerConfig,

    #[validate(nested)]
    pub publisher: PublisherConfig,

    #[cfg(feature = "wlcbee-mqtt")]
    #[validate(nested)]
    pub transport: TransportConfig,

    /// Controllers to poll. May be empty; targets can be added on reload.
    #[validate(nested)]
    pub targets: Vec<Target>,
}

#[cfg(feature = "wlcbee-mqtt")]
pub type TransportConfig = wlcbee_mqtt::Config;

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be found, read, parsed or
    /// validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;
        Self::load(&config_path)
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `WLCBEE_CONFIG` environment variable
    /// 2. `/etc/wlcbee/config.toml`
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", ENV_CONFIG_PATH, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found, set {} or create {}",
            ENV_CONFIG_PATH, DEFAULT_CONFIG_PATH
        )))
    }

    /// Loads and validates configuration from the specified path.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let config = Self::read(path)?;
        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Same as [`Config::load`] without console output, for reloads that
    /// happen after tracing is up.
    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
