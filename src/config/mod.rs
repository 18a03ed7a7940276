//! Configuration module for Mizuchi S3
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use crate::s3::addressing::is_valid_endpoint;
use crate::s3::{S3Client, S3ClientConfig, S3ClientError};
use crate::upload::plan::{MAX_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        // Append the text before the match
        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Whether a value still carries an unexpanded `${...}` placeholder
fn is_unresolved(value: &str) -> bool {
    value.contains("${")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client;

        if !is_valid_endpoint(&client.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint '{}': expected a host name or IP address without scheme or port",
                client.endpoint
            )));
        }

        if client.port == Some(0) {
            return Err(ConfigError::ValidationError("Port cannot be 0".into()));
        }

        match (&client.access_key, &client.secret_key) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "access_key and secret_key must be set together".into(),
                ))
            }
            (Some(access), Some(secret)) if is_unresolved(access) || is_unresolved(secret) => {
                return Err(ConfigError::ValidationError(
                    "Credentials reference an unset environment variable".into(),
                ))
            }
            _ => {}
        }

        match (&client.app_name, &client.app_version) {
            (Some(name), Some(version)) if name.trim().is_empty() || version.trim().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "app_name and app_version cannot be empty".into(),
                ))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "app_name and app_version must be set together".into(),
                ))
            }
            _ => {}
        }

        if let Some(part_size) = self.upload.part_size {
            if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid part_size {}: must be between {} and {} bytes",
                    part_size, MIN_PART_SIZE, MAX_PART_SIZE
                )));
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty', 'compact', or 'json'",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Client settings in the form [`S3Client::new`] takes
    pub fn client_config(&self) -> S3ClientConfig {
        let client = &self.client;
        S3ClientConfig {
            endpoint: client.endpoint.clone(),
            port: client.port,
            use_ssl: client.use_ssl,
            access_key: client.access_key.clone(),
            secret_key: client.secret_key.clone(),
            session_token: client.session_token.clone().filter(|t| !t.is_empty()),
            region: client.region.clone().filter(|r| !r.is_empty()),
            path_style: client.path_style,
            part_size: self.upload.part_size,
            accelerate_endpoint: client.accelerate_endpoint.clone(),
        }
    }

    /// Build a client from this configuration
    pub fn build_client(&self) -> Result<S3Client, S3ClientError> {
        let client = S3Client::new(self.client_config())?;
        match (&self.client.app_name, &self.client.app_version) {
            (Some(name), Some(version)) => client.with_app_info(name, version),
            _ => Ok(client),
        }
    }
}

/// S3 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Fixed region; disables bucket region lookups
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    #[serde(default)]
    pub accelerate_endpoint: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            port: None,
            use_ssl: default_use_ssl(),
            access_key: None,
            secret_key: None,
            session_token: None,
            region: None,
            path_style: default_path_style(),
            accelerate_endpoint: None,
            app_name: None,
            app_version: None,
        }
    }
}

fn default_endpoint() -> String {
    "s3.amazonaws.com".to_string()
}

fn default_use_ssl() -> bool {
    true
}

fn default_path_style() -> bool {
    true
}

/// Upload configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Multipart part size override in bytes
    #[serde(default)]
    pub part_size: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty`, `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.endpoint, "s3.amazonaws.com");
        assert!(config.client.use_ssl);
        assert!(config.client.path_style);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = Config::default();
        config.client.endpoint = "https://s3.amazonaws.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port() {
        let mut config = Config::default();
        config.client.port = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_credentials() {
        let mut config = Config::default();
        config.client.access_key = Some("access".into());
        assert!(config.validate().is_err());

        config.client.secret_key = Some("secret".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unresolved_credentials() {
        let mut config = Config::default();
        config.client.access_key = Some("${MIZUCHI_TEST_UNSET_KEY}".into());
        config.client.secret_key = Some("secret".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_info_pairing() {
        let mut config = Config::default();
        config.client.app_name = Some("app".into());
        assert!(config.validate().is_err());

        config.client.app_version = Some("1.0".into());
        assert!(config.validate().is_ok());

        let client = config.build_client().unwrap();
        assert!(client.user_agent().ends_with(" app/1.0"));
    }

    #[test]
    fn test_part_size_bounds() {
        let mut config = Config::default();
        config.upload.part_size = Some(1024);
        assert!(config.validate().is_err());

        config.upload.part_size = Some(MIN_PART_SIZE);
        assert!(config.validate().is_ok());
        assert_eq!(config.client_config().part_size, Some(MIN_PART_SIZE));
    }

    #[test]
    fn test_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("MIZUCHI_TEST_VAR", "value");
        assert_eq!(expand_env_vars("a-${MIZUCHI_TEST_VAR}-b"), "a-value-b");
        assert_eq!(expand_env_vars("${MIZUCHI_TEST_MISSING:-fallback}"), "fallback");
        assert_eq!(expand_env_vars("${MIZUCHI_TEST_MISSING}"), "${MIZUCHI_TEST_MISSING}");
        std::env::remove_var("MIZUCHI_TEST_VAR");
    }
}
