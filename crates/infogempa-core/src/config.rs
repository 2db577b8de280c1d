use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Application name used for config/data directory paths
const APP_NAME: &str = "infogempa";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

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

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

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

    /// Local storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Offline shell cache settings
    #[serde(default)]
    pub shell: ShellConfig,

    /// Earthquake feed settings
    #[serde(default)]
    pub gempa: GempaConfig,

    /// Weather feed settings
    #[serde(default)]
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the key-value store and the shell cache database
    pub data_dir: PathBuf,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);
        Self {
            data_dir,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl StorageConfig {
    /// Path of the durable key-value store
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("storage.db")
    }

    /// Path of the cache generation database
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("shell-cache.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Cache generation name. Bump whenever `manifest` changes.
    pub cache_version: String,

    /// Origin the application shell is served from
    pub origin: String,

    /// Shell assets cached at install time, relative to `origin`
    pub manifest: Vec<String>,

    /// Origins whose responses are cached network-first
    pub data_origins: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cache_version: "infogempa-v2".to_string(),
            origin: "http://localhost:8080".to_string(),
            manifest: vec![
                "/".to_string(),
                "/static/js/bundle.js".to_string(),
                "/static/css/main.css".to_string(),
                "/manifest.webmanifest".to_string(),
                "/icon-192.png".to_string(),
                "/icon-512.png".to_string(),
            ],
            data_origins: vec![
                "https://data.bmkg.go.id".to_string(),
                "https://api.openweathermap.org".to_string(),
            ],
        }
    }
}

impl ShellConfig {
    /// Parsed shell origin
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.origin, "shell.origin")
    }

    /// Parsed data origins
    pub fn data_origin_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.data_origins
            .iter()
            .map(|o| parse_url(o, "shell.data_origins"))
            .collect()
    }

    /// Manifest entries resolved against the shell origin
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        let origin = self.origin_url()?;
        self.manifest
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| {
                    ConfigError::Invalid(format!("shell.manifest entry '{}': {}", path, e))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GempaConfig {
    /// Recent earthquakes list endpoint
    pub list_url: String,

    /// Latest automatic earthquake endpoint
    pub latest_url: String,

    /// Refresh interval in minutes
    #[serde(default = "default_gempa_refresh")]
    pub refresh_minutes: u32,
}

fn default_gempa_refresh() -> u32 {
    5
}

impl Default for GempaConfig {
    fn default() -> Self {
        Self {
            list_url: "https://data.bmkg.go.id/DataMKG/TEWS/gempaterkini.json".to_string(),
            latest_url: "https://data.bmkg.go.id/DataMKG/TEWS/autogempa.json".to_string(),
            refresh_minutes: default_gempa_refresh(),
        }
    }
}

impl GempaConfig {
    pub fn list_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.list_url, "gempa.list_url")
    }

    pub fn latest_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.latest_url, "gempa.latest_url")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Weather API base URL
    pub base_url: String,

    /// API key (can also be set via OPENWEATHER_API_KEY)
    pub api_key: Option<String>,

    /// City shown when nothing else is selected
    pub default_city: String,

    /// Refresh interval in minutes
    pub refresh_minutes: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key: std::env::var("OPENWEATHER_API_KEY").ok(),
            default_city: "Jakarta".to_string(),
            refresh_minutes: 30,
        }
    }
}

impl WeatherConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.base_url, "weather.base_url")
    }

    /// Configured key, falling back to the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENWEATHER_API_KEY").ok())
    }
}

fn parse_url(value: &str, field: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);

        Self {
            config_dir,
            storage: StorageConfig::default(),
            shell: ShellConfig::default(),
            gempa: GempaConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.shell.cache_version.trim().is_empty() {
            result.add_error("shell.cache_version", "Cache version must not be empty");
        }

        self.validate_url(&self.shell.origin, "shell.origin", &mut result);
        for origin in &self.shell.data_origins {
            self.validate_url(origin, "shell.data_origins", &mut result);
        }

        if self.shell.manifest.is_empty() {
            result.add_warning("shell.manifest", "No shell assets will be cached offline");
        } else if !self.shell.manifest.iter().any(|p| p == "/") {
            result.add_warning(
                "shell.manifest",
                "Root document is not cached; offline navigation has no fallback",
            );
        }

        self.validate_url(&self.gempa.list_url, "gempa.list_url", &mut result);
        self.validate_url(&self.gempa.latest_url, "gempa.latest_url", &mut result);

        if self.gempa.refresh_minutes == 0 {
            result.add_error(
                "gempa.refresh_minutes",
                "Refresh interval must be greater than 0",
            );
        }

        self.validate_url(&self.weather.base_url, "weather.base_url", &mut result);

        if self.weather.refresh_minutes == 0 {
            result.add_error(
                "weather.refresh_minutes",
                "Refresh interval must be greater than 0",
            );
        } else if self.weather.refresh_minutes > 1440 {
            result.add_warning(
                "weather.refresh_minutes",
                "Weather refresh interval is more than 24 hours",
            );
        }

        if self.weather.resolved_api_key().is_none() {
            result.add_warning(
                "weather.api_key",
                "Weather API key not configured - weather feed will be unavailable",
            );
        }

        if self.storage.http_timeout_secs == 0 {
            result.add_error("storage.http_timeout_secs", "Timeout must be greater than 0");
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

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_NAME);

        Ok(config_dir.join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn config_with_key() -> Config {
        let mut config = Config::default();
        config.weather.api_key = Some("test-key".to_string());
        config
    }

    #[test]
    fn test_valid_default_config() {
        let config = config_with_key();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_url() {
        let mut config = config_with_key();
        config.gempa.list_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "gempa.list_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = config_with_key();
        config.shell.origin = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_refresh_interval_is_error() {
        let mut config = config_with_key();
        config.gempa.refresh_minutes = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "gempa.refresh_minutes"));
    }

    #[test]
    fn test_manifest_without_root_is_warning() {
        let mut config = config_with_key();
        config.shell.manifest = vec!["/manifest.webmanifest".to_string()];
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "shell.manifest"));
    }

    #[test]
    fn test_manifest_urls_resolve_against_origin() {
        let mut config = Config::default();
        config.shell.origin = "http://127.0.0.1:9000".to_string();
        config.shell.manifest = vec!["/".to_string(), "/manifest.webmanifest".to_string()];

        let urls = config.shell.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "http://127.0.0.1:9000/");
        assert_eq!(urls[1].as_str(), "http://127.0.0.1:9000/manifest.webmanifest");
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.shell.cache_version, "infogempa-v2");
        assert_eq!(config.gempa.refresh_minutes, 5);
    }

    #[test]
    fn test_save_and_reload_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.shell.cache_version = "infogempa-v3".to_string();
        config.weather.default_city = "Bandung".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.shell.cache_version, "infogempa-v3");
        assert_eq!(loaded.weather.default_city, "Bandung");
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
