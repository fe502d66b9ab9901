//! Configuration management for chatstream
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for chatstream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transport client settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Conversation store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the chat server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the streaming chat endpoint, relative to `base_url`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Timeout for a whole streaming request (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of consecutive undecodable frames after which a stream is
    /// aborted. Isolated bad frames are skipped.
    #[serde(default = "default_max_consecutive_parse_errors")]
    pub max_consecutive_parse_errors: usize,

    /// Static headers sent with every request (e.g. Authorization)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_endpoint() -> String {
    "/api/chat".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_consecutive_parse_errors() -> usize {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout(),
            max_consecutive_parse_errors: default_max_consecutive_parse_errors(),
            headers: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Full URL of the chat endpoint
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` if the base URL cannot be parsed or
    /// joined with the endpoint path.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::config::ClientConfig;
    ///
    /// let config = ClientConfig::default();
    /// assert_eq!(config.endpoint_url().unwrap().as_str(), "http://localhost:8000/api/chat");
    /// ```
    pub fn endpoint_url(&self) -> Result<url::Url> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ChatError::Config(format!("Invalid base_url: {}", e)))?;
        base.join(&self.endpoint)
            .map_err(|e| ChatError::Config(format!("Invalid endpoint: {}", e)).into())
    }
}

/// Conversation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the sled database holding saved conversations.
    /// Defaults to the platform data directory.
    #[serde(default)]
    pub history_path: Option<PathBuf>,

    /// Key under which the store snapshot is saved
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Timezone reported to the server in every request context
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_storage_key() -> String {
    "chat-history".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_path: None,
            storage_key: default_storage_key(),
            timezone: default_timezone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML document
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` if the document is not valid YAML for
    /// this structure.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("CHATSTREAM_BASE_URL") {
            self.client.base_url = base_url;
        }

        if let Ok(endpoint) = std::env::var("CHATSTREAM_ENDPOINT") {
            self.client.endpoint = endpoint;
        }

        if let Ok(timeout) = std::env::var("CHATSTREAM_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(t) => self.client.timeout_seconds = t,
                Err(_) => tracing::warn!("Ignoring invalid CHATSTREAM_TIMEOUT_SECONDS: {}", timeout),
            }
        }

        if let Ok(path) = std::env::var("CHATSTREAM_HISTORY_PATH") {
            self.store.history_path = Some(PathBuf::from(path));
        }

        if let Ok(key) = std::env::var("CHATSTREAM_STORAGE_KEY") {
            self.store.storage_key = key;
        }

        if let Ok(tz) = std::env::var("CHATSTREAM_TIMEZONE") {
            self.store.timezone = tz;
        } else if let Ok(tz) = std::env::var("TZ") {
            if !tz.is_empty() {
                self.store.timezone = tz;
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            tracing::debug!("Using storage path override from CLI: {}", path.display());
            self.store.history_path = Some(path.clone());
        }
        if let Some(base_url) = &cli.base_url {
            self.client.base_url = base_url.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        self.client.endpoint_url()?;

        if !self.client.endpoint.starts_with('/') {
            return Err(
                ChatError::Config("client.endpoint must start with '/'".to_string()).into(),
            );
        }

        if self.client.timeout_seconds == 0 {
            return Err(ChatError::Config(
                "client.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.max_consecutive_parse_errors == 0 {
            return Err(ChatError::Config(
                "client.max_consecutive_parse_errors must be greater than 0".to_string(),
            )
            .into());
        }

        if self.store.storage_key.trim().is_empty() {
            return Err(
                ChatError::Config("store.storage_key cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;

    fn cli(args: &[&str]) -> crate::cli::Cli {
        let mut full = vec!["chatstream"];
        full.extend_from_slice(args);
        crate::cli::Cli::parse_from(full)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.client.base_url, "http://localhost:8000");
        assert_eq!(config.client.endpoint, "/api/chat");
        assert_eq!(config.client.timeout_seconds, 300);
        assert_eq!(config.client.max_consecutive_parse_errors, 3);
        assert_eq!(config.store.storage_key, "chat-history");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_base_url() {
        let mut config = Config::default();
        config.client.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_relative_endpoint() {
        let mut config = Config::default();
        config.client.endpoint = "api/chat".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.client.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_parse_error_budget() {
        let mut config = Config::default();
        config.client.max_consecutive_parse_errors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_storage_key() {
        let mut config = Config::default();
        config.store.storage_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
client:
  base_url: "https://chat.example.com"
  endpoint: "/v1/chat"
  headers:
    Authorization: "Bearer abc"
store:
  storage_key: "work"
logging:
  json: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.client.base_url, "https://chat.example.com");
        assert_eq!(
            config.client.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert_eq!(config.client.timeout_seconds, 300);
        assert_eq!(config.store.storage_key, "work");
        assert_eq!(config.store.timezone, "UTC");
        assert!(config.logging.json);
        assert_eq!(
            config.client.endpoint_url().unwrap().as_str(),
            "https://chat.example.com/v1/chat"
        );
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        assert!(Config::from_yaml("client: [1, 2").is_err());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let config = Config::load("/nonexistent/chatstream.yaml", &cli(&["history", "list"]))
            .expect("defaults");
        assert_eq!(config.client.endpoint, "/api/chat");
    }

    #[test]
    #[serial]
    fn test_env_vars_override_file_values() {
        std::env::set_var("CHATSTREAM_BASE_URL", "http://env.example:9000");
        std::env::set_var("CHATSTREAM_TIMEZONE", "Europe/Warsaw");
        std::env::set_var("CHATSTREAM_TIMEOUT_SECONDS", "not-a-number");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("CHATSTREAM_BASE_URL");
        std::env::remove_var("CHATSTREAM_TIMEZONE");
        std::env::remove_var("CHATSTREAM_TIMEOUT_SECONDS");

        assert_eq!(config.client.base_url, "http://env.example:9000");
        assert_eq!(config.store.timezone, "Europe/Warsaw");
        assert_eq!(config.client.timeout_seconds, 300);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_storage_path_and_base_url() {
        let cli = cli(&[
            "--storage-path",
            "/tmp/chatstream-db",
            "--base-url",
            "http://cli.example",
            "history",
            "list",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(
            config.store.history_path,
            Some(PathBuf::from("/tmp/chatstream-db"))
        );
        assert_eq!(config.client.base_url, "http://cli.example");
    }
}
