use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Longest accepted fetch timeout, in seconds
const MAX_TIMEOUT_SECS: u64 = 300;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Forecast freshness and fetch deadline
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Weather provider settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Local forecast store
    #[serde(default)]
    pub storage: StorageConfig,

    /// How forecasts are shown
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Age after which a stored forecast is re-fetched, in minutes
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,

    /// Maximum time a single fetch may take, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ttl_minutes() -> u64 {
    180
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ForecastConfig {
    /// Freshness window as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    /// Fetch deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the OpenWeatherMap API
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// API key (optional here, can be set via OPENWEATHER_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_api_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: None,
        }
    }
}

impl ApiConfig {
    /// Key from the config file, falling back to the environment.
    pub fn effective_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENWEATHER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file name, relative to the config directory
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "forecasts.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Show temperatures in Fahrenheit rather than Celsius
    #[serde(default = "default_degrees_fahrenheit")]
    pub degrees_fahrenheit: bool,
}

fn default_degrees_fahrenheit() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            degrees_fahrenheit: default_degrees_fahrenheit(),
        }
    }
}

impl DisplayConfig {
    /// Whole degrees in the preferred unit, truncated toward zero.
    pub fn temperature(&self, kelvin: f64) -> i64 {
        if self.degrees_fahrenheit {
            (1.8 * (kelvin - 273.0) + 32.0) as i64
        } else {
            (kelvin - 273.15) as i64
        }
    }

    pub fn unit_suffix(&self) -> &'static str {
        if self.degrees_fahrenheit {
            "°F"
        } else {
            "°C"
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("forecastbuddy");

        Self {
            config_dir,
            forecast: ForecastConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult), ConfigError> {
        let config = Self::load().map_err(|e| ConfigError::ParseError(format!("{:#}", e)))?;
        config.validated()
    }

    /// Validate, logging warnings and rejecting the config on errors
    pub fn validated(self) -> Result<(Self, ValidationResult), ConfigError> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((self, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.api.base_url, "api.base_url", &mut result);

        if self.api.effective_api_key().is_none() {
            result.add_warning(
                "api.api_key",
                "No API key configured - forecast requests will be rejected",
            );
        }

        if self.forecast.ttl_minutes == 0 {
            result.add_warning(
                "forecast.ttl_minutes",
                "Caching disabled (0 minutes) - every request hits the network",
            );
        } else if self.forecast.ttl_minutes > 1440 {
            result.add_warning(
                "forecast.ttl_minutes",
                "Forecast refresh interval is more than 24 hours",
            );
        }

        if self.forecast.timeout_secs == 0 {
            result.add_error("forecast.timeout_secs", "Timeout must be greater than 0");
        } else if self.forecast.timeout_secs > MAX_TIMEOUT_SECS {
            result.add_error(
                "forecast.timeout_secs",
                format!("Timeout cannot exceed {} seconds", MAX_TIMEOUT_SECS),
            );
        } else if self.forecast.timeout_secs > 60 {
            result.add_warning(
                "forecast.timeout_secs",
                "Fetch timeout is unusually long (>60 seconds)",
            );
        }

        if self.storage.database_file.trim().is_empty() {
            result.add_error("storage.database_file", "Database file name cannot be empty");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Full path of the SQLite forecast store
    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join(&self.storage.database_file)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("forecastbuddy");

        Ok(config_dir.join("config.toml"))
    }
}
