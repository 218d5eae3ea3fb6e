use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::default_static_assets;
use crate::sync::{ConflictStrategy, RetryPolicy};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Retry schedule for failed queue items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Connectivity probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Seconds between health checks
    pub interval_secs: u64,
    /// Seconds between periodic syncs while online
    pub periodic_sync_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            periodic_sync_secs: 300,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn periodic_sync(&self) -> Duration {
        Duration::from_secs(self.periodic_sync_secs.max(1))
    }
}

/// Caching proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub port: u16,
    /// Portal origin the proxy forwards to
    pub upstream_url: Option<String>,
    /// Assets pre-cached on install
    pub static_assets: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            upstream_url: None,
            static_assets: default_static_assets(),
        }
    }
}

impl ProxyConfig {
    /// Local URL of the proxy.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Offline queue database
    pub database_path: ConfigValue<PathBuf>,
    /// Response cache database
    pub cache_path: ConfigValue<PathBuf>,
    /// Portal API base URL
    pub api_url: ConfigValue<Option<String>>,
    #[serde(skip_serializing)]
    pub api_token: ConfigValue<Option<String>>,
    pub conflict_strategy: ConfigValue<ConflictStrategy>,
    pub retry: RetryConfig,
    pub probe: ProbeConfig,
    pub proxy: ProxyConfig,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    api_url: Option<String>,
    api_token: Option<String>,
    conflict_strategy: Option<ConflictStrategy>,
    retry: Option<RetryConfig>,
    probe: Option<ProbeConfig>,
    proxy: Option<ProxyConfig>,
}

/// Resolve relative paths against the config file's directory
fn resolve(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path.parent().map(|p| p.join(&path)).unwrap_or(path)
    } else {
        path
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading environment variables through `env`.
    pub fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = Self::default_data_dir();

        // Start with defaults
        let mut database_path =
            ConfigValue::new(data_dir.join("offline.db"), ConfigSource::Default);
        let mut cache_path = ConfigValue::new(data_dir.join("cache.db"), ConfigSource::Default);
        let mut api_url = ConfigValue::new(None, ConfigSource::Default);
        let mut api_token = ConfigValue::new(None, ConfigSource::Default);
        let mut conflict_strategy =
            ConfigValue::new(ConflictStrategy::default(), ConfigSource::Default);
        let mut retry = RetryConfig::default();
        let mut probe = ProbeConfig::default();
        let mut proxy = ProxyConfig::default();
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                database_path = ConfigValue::new(resolve(&path, db_path), ConfigSource::File);
            }
            if let Some(cache) = file_config.cache_path {
                cache_path = ConfigValue::new(resolve(&path, cache), ConfigSource::File);
            }
            if let Some(url) = file_config.api_url {
                api_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(token) = file_config.api_token {
                api_token = ConfigValue::new(Some(token), ConfigSource::File);
            }
            if let Some(strategy) = file_config.conflict_strategy {
                conflict_strategy = ConfigValue::new(strategy, ConfigSource::File);
            }
            if let Some(file_retry) = file_config.retry {
                retry = file_retry;
            }
            if let Some(file_probe) = file_config.probe {
                probe = file_probe;
            }
            if let Some(file_proxy) = file_config.proxy {
                proxy = file_proxy;
            }
        }

        // Apply environment variable overrides
        if let Some(db_path) = env("SMS_OFFLINE_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(cache) = env("SMS_OFFLINE_CACHE_PATH") {
            cache_path = ConfigValue::new(PathBuf::from(cache), ConfigSource::Environment);
        }
        if let Some(url) = env("SMS_OFFLINE_API_URL") {
            api_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Some(token) = env("SMS_OFFLINE_API_TOKEN") {
            api_token = ConfigValue::new(Some(token), ConfigSource::Environment);
        }
        if let Some(port) = env("SMS_OFFLINE_PROXY_PORT") {
            proxy.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SMS_OFFLINE_PROXY_PORT", port))?;
        }
        if let Some(url) = env("SMS_OFFLINE_UPSTREAM_URL") {
            proxy.upstream_url = Some(url);
        }

        Ok(Self {
            database_path,
            cache_path,
            api_url,
            api_token,
            conflict_strategy,
            retry,
            probe,
            proxy,
            config_file,
        })
    }

    /// API base URL, required for anything that talks to the portal.
    pub fn require_api_url(&self) -> Result<&str, ConfigError> {
        self.api_url
            .value
            .as_deref()
            .ok_or(ConfigError::Missing("api_url", "SMS_OFFLINE_API_URL"))
    }

    /// Upstream for the proxy; falls back to the API URL.
    pub fn upstream_url(&self) -> Result<&str, ConfigError> {
        match self.proxy.upstream_url.as_deref() {
            Some(url) => Ok(url),
            None => self
                .api_url
                .value
                .as_deref()
                .ok_or(ConfigError::Missing("proxy.upstream_url", "SMS_OFFLINE_UPSTREAM_URL")),
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/sms-offline/
    /// - macOS: ~/Library/Application Support/sms-offline/
    /// - Windows: %APPDATA%/sms-offline/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sms-offline")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/sms-offline/
    /// - macOS: ~/Library/Application Support/sms-offline/
    /// - Windows: %APPDATA%/sms-offline/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sms-offline")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
    /// Setting name and the environment variable that provides it
    Missing(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value '{}' for {}", value, key)
            }
            ConfigError::Missing(key, env) => {
                write!(f, "{} is not configured. Set it in the config file or via {}", key, env)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
