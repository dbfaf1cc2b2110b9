//! Application configuration.
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `$FOOTFALL_CONFIG`, else the platform default path
//! 3. Environment variables such as `FOOTFALL__LINK__NAME_PREFIX=HC-06`
//!
//! ```toml
//! [link]
//! service_uuid = "0000ffe0-0000-1000-8000-00805f9b34fb"
//! characteristic_uuid = "0000ffe1-0000-1000-8000-00805f9b34fb"
//! name_prefix = "HC-05"
//! discovery_timeout_secs = 15
//!
//! [simulation]
//! enabled = true
//! period_ms = 3000
//!
//! [server]
//! bind_address = "0.0.0.0:8080"
//!
//! [logging]
//! production = false
//! level = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::link::LinkProfile;
use crate::protocol;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "FOOTFALL_CONFIG";

const ENV_PREFIX: &str = "FOOTFALL";
const ENV_SEPARATOR: &str = "__";

/// Shortest synthetic tick period accepted.
pub const MIN_SIMULATION_PERIOD_MS: u64 = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// A source could not be read or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("Configuration has {} errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BLE link settings.
    pub link: LinkConfig,

    /// Synthetic event source settings.
    pub simulation: SimulationConfig,

    /// HTTP server settings.
    pub server: ServerConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// BLE link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Service advertised by the bridge.
    pub service_uuid: Uuid,

    /// Notify/write characteristic.
    pub characteristic_uuid: Uuid,

    /// Fallback name prefix for discovery; empty disables the fallback.
    pub name_prefix: String,

    /// Adapter to use (e.g. `hci1`); the default adapter when unset.
    pub adapter: Option<String>,

    /// How long discovery may run before the attempt fails.
    pub discovery_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            characteristic_uuid: protocol::CHARACTERISTIC_UUID,
            name_prefix: protocol::NAME_PREFIX.to_string(),
            adapter: None,
            discovery_timeout_secs: 15,
        }
    }
}

impl LinkConfig {
    /// GATT profile described by this section.
    #[must_use]
    pub fn profile(&self) -> LinkProfile {
        LinkProfile {
            service: self.service_uuid,
            characteristic: self.characteristic_uuid,
            name_prefix: self.name_prefix.clone(),
        }
    }

    /// Discovery timeout as a [`Duration`].
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Synthetic event source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Generate demo events while no device is connected.
    pub enabled: bool,

    /// Time between synthetic ticks.
    pub period_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 3000,
        }
    }
}

impl SimulationConfig {
    /// Tick period as a [`Duration`].
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// `ValidationError` if the address does not parse.
    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::ValidationError {
                field: "server.bind_address".into(),
                message: format!("'{}' is not a socket address: {e}", self.bind_address),
            })
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON log files plus compact stdout instead of pretty stdout.
    pub production: bool,

    /// Default level filter when neither `FOOTFALL_LOG_LEVEL` nor `RUST_LOG` is set.
    pub level: String,

    /// Where production log files go; the platform log directory when unset.
    pub directory: Option<PathBuf>,

    /// Daily log files kept before the oldest is deleted.
    pub retained_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            production: false,
            level: "info".to_string(),
            directory: None,
            retained_files: 14,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if `$FOOTFALL_CONFIG` names a missing file, a source
    /// cannot be parsed, or the result fails validation.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Some(Path::new(&path))),
            None => Self::load_from(None),
        }
    }

    /// Load configuration with an explicit file.
    ///
    /// With `None` the platform default path is used if it exists.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from(path: Option<&Path>) -> ConfigResult<Self> {
        Self::build(path, environment())
    }

    fn build(path: Option<&Path>, env: Environment) -> ConfigResult<Self> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                tracing::debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    tracing::debug!(path = %path.display(), "Loading configuration file");
                    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                }
            }
        }

        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// `ValidationError` for a single problem, `MultipleValidationErrors`
    /// otherwise.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if self.link.service_uuid.is_nil() {
            invalid("link.service_uuid", "must not be the nil UUID".into());
        }
        if self.link.characteristic_uuid.is_nil() {
            invalid("link.characteristic_uuid", "must not be the nil UUID".into());
        }
        if self.link.discovery_timeout_secs == 0 {
            invalid("link.discovery_timeout_secs", "must be at least 1".into());
        }
        if self
            .link
            .adapter
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            invalid("link.adapter", "must not be blank when set".into());
        }
        if self.simulation.period_ms < MIN_SIMULATION_PERIOD_MS {
            invalid(
                "simulation.period_ms",
                format!("must be at least {MIN_SIMULATION_PERIOD_MS}"),
            );
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, LOG_LEVELS.join(", ")),
            );
        }
        if self.logging.retained_files == 0 {
            invalid("logging.retained_files", "must be at least 1".into());
        }
        if self
            .logging
            .directory
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            invalid("logging.directory", "must not be empty when set".into());
        }
        if let Err(err) = self.server.socket_addr() {
            errors.push(err);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

/// Platform default config file location.
///
/// `/etc/footfall/config.toml` on Linux, the user config directory elsewhere.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/footfall/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "footfall")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn no_env() -> Environment {
        environment().source(Some(config::Map::new()))
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        environment().source(Some(map))
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.link.service_uuid, protocol::SERVICE_UUID);
        assert_eq!(config.link.name_prefix, "HC-05");
        assert_eq!(config.simulation.period(), Duration::from_secs(3));
        assert!(config.simulation.enabled);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            [link]
            name_prefix = "HC-06"
            adapter = "hci1"

            [simulation]
            enabled = false
            "#,
        );

        let config = Config::build(Some(file.path()), no_env()).unwrap();

        assert_eq!(config.link.name_prefix, "HC-06");
        assert_eq!(config.link.adapter.as_deref(), Some("hci1"));
        assert!(!config.simulation.enabled);
        // Untouched keys keep their defaults.
        assert_eq!(config.simulation.period_ms, 3000);
        assert_eq!(config.link.characteristic_uuid, protocol::CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config("[simulation]\nperiod_ms = 5000\n");
        let vars = env(&[
            ("FOOTFALL__SIMULATION__PERIOD_MS", "1000"),
            ("FOOTFALL__SERVER__BIND_ADDRESS", "127.0.0.1:9000"),
        ]);

        let config = Config::build(Some(file.path()), vars).unwrap();

        assert_eq!(config.simulation.period_ms, 1000);
        assert_eq!(
            config.server.socket_addr().unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = Config::build(Some(&path), no_env()).unwrap_err();

        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_file() {
        let file = write_config("[link\nname_prefix = ");
        let err = Config::build(Some(file.path()), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_uuid_is_parse_error() {
        let file = write_config("[link]\nservice_uuid = \"not-a-uuid\"\n");
        let err = Config::build(Some(file.path()), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = Config::default();
        config.simulation.period_ms = 10;

        let err = config.validate().unwrap_err();

        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "simulation.period_ms");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_logging_section_from_file() {
        let file = write_config(
            r#"
            [logging]
            production = true
            directory = "/srv/footfall/logs"
            retained_files = 3
            "#,
        );

        let config = Config::build(Some(file.path()), no_env()).unwrap();

        assert!(config.logging.production);
        assert_eq!(
            config.logging.directory.as_deref(),
            Some(std::path::Path::new("/srv/footfall/logs"))
        );
        assert_eq!(config.logging.retained_files, 3);
    }

    #[test]
    fn test_logging_retention_must_keep_a_file() {
        let mut config = Config::default();
        config.logging.retained_files = 0;

        match config.validate().unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "logging.retained_files");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_validation_errors() {
        let mut config = Config::default();
        config.link.discovery_timeout_secs = 0;
        config.logging.level = "loud".into();
        config.server.bind_address = "nowhere".into();

        let err = config.validate().unwrap_err();

        match err {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_profile_from_link_config() {
        let config = LinkConfig {
            name_prefix: String::new(),
            ..LinkConfig::default()
        };
        let profile = config.profile();
        assert_eq!(profile.service, protocol::SERVICE_UUID);
        assert!(profile.name_prefix.is_empty());
        assert_eq!(config.discovery_timeout(), Duration::from_secs(15));
    }
}
