//! Configuration module for the stream bridge.
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Endpoints can be written as tables or as URI strings.
//!
//! # Example
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [bridge]
//! global_header_filters = "environment=production"
//! service_name = "orders"
//!
//! [[consumers]]
//! stream = "orders"
//! group = "billing"
//! events = "OrderCreated,OrderCancelled"
//! header_filters = "region=US"
//! ```
//!
//! ```toml
//! consumers = ["redis-stream://orders?group=audit&events=OrderCreated&autoAck=false"]
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::filter::AllowedEvents;
use crate::store::NEW_ENTRIES;

/// URI scheme accepted by [`EndpointConfig::from_uri`].
pub const URI_SCHEME: &str = "redis-stream:";

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "STREAMBRIDGE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/streambridge.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Consumer endpoints (tables or URI strings)
    #[serde(default, deserialize_with = "deserialize_endpoints")]
    pub consumers: Vec<EndpointConfig>,

    /// Producer endpoints (tables or URI strings)
    #[serde(default, deserialize_with = "deserialize_endpoints")]
    pub producers: Vec<EndpointConfig>,
}

/// HTTP ingest server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Overrides any password embedded in the URL
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Settings shared by every endpoint in the process.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeSettings {
    /// Header filters applied to every consumer, overridable per consumer
    #[serde(default)]
    pub global_header_filters: String,

    /// Default `serviceName` stamped on produced events
    #[serde(default)]
    pub service_name: Option<String>,
}

/// One stream endpoint: what to read or write and how.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Stream key
    pub stream: String,

    /// Consumer group (required for consumers)
    #[serde(default)]
    pub group: Option<String>,

    /// Comma-separated event types to deliver (required for consumers)
    #[serde(default)]
    pub events: Option<String>,

    /// Fixed consumer name; generated when absent
    #[serde(default)]
    pub consumer_name: Option<String>,

    /// Maximum entries per read
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a read blocks waiting for entries
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Delay between poll cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_true")]
    pub auto_ack: bool,

    #[serde(default = "default_true")]
    pub auto_create_stream: bool,

    #[serde(default = "default_true")]
    pub auto_create_group: bool,

    /// Read offset; `>` reads only entries never delivered to the group
    #[serde(default = "default_start_id")]
    pub start_id: String,

    /// Route-level header filters (`k=v,k=v`)
    #[serde(default)]
    pub header_filters: String,

    /// Overrides the bridge-wide service name for this producer
    #[serde(default)]
    pub service_name: Option<String>,
}

fn default_batch_size() -> usize {
    10
}

fn default_block_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_start_id() -> String {
    NEW_ENTRIES.to_string()
}

impl EndpointConfig {
    /// Endpoint for `stream` with every option at its default.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: None,
            events: None,
            consumer_name: None,
            batch_size: default_batch_size(),
            block_timeout_ms: default_block_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            auto_ack: true,
            auto_create_stream: true,
            auto_create_group: true,
            start_id: default_start_id(),
            header_filters: String::new(),
            service_name: None,
        }
    }

    /// Consumer endpoint with the three required settings.
    pub fn consumer(
        stream: impl Into<String>,
        group: impl Into<String>,
        events: impl Into<String>,
    ) -> Self {
        let mut endpoint = Self::new(stream);
        endpoint.group = Some(group.into());
        endpoint.events = Some(events.into());
        endpoint
    }

    pub fn with_header_filters(mut self, filters: impl Into<String>) -> Self {
        self.header_filters = filters.into();
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse a URI of the form
    /// `redis-stream://<stream>?group=<g>&events=<A,B>&headerFilters=<k=v,...>`.
    ///
    /// Keys are accepted in camelCase or snake_case. Values are taken
    /// literally (no percent-decoding) and are split on the first `=`, so
    /// `headerFilters=region=US,tier=gold` works unquoted.
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let rest = uri.trim().strip_prefix(URI_SCHEME).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "Endpoint URI '{}' must start with '{}'",
                uri, URI_SCHEME
            ))
        })?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (stream, query) = rest.split_once('?').unwrap_or((rest, ""));

        if stream.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("stream in '{}'", uri)));
        }

        let mut endpoint = Self::new(stream.trim());
        for param in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            endpoint.apply_param(key.trim(), value.trim())?;
        }

        Ok(endpoint)
    }

    fn apply_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "group" => self.group = Some(value.to_string()),
            "events" => self.events = Some(value.to_string()),
            "consumerName" | "consumer_name" => self.consumer_name = Some(value.to_string()),
            "maxMessages" | "batchSize" | "batch_size" => {
                self.batch_size = parse_param(key, value)?
            }
            "blockTimeout" | "block_timeout_ms" => self.block_timeout_ms = parse_param(key, value)?,
            "pollingInterval" | "poll_interval_ms" => {
                self.poll_interval_ms = parse_param(key, value)?
            }
            "autoAck" | "auto_ack" => self.auto_ack = parse_bool(key, value)?,
            "autoCreateStreams" | "auto_create_stream" => {
                self.auto_create_stream = parse_bool(key, value)?
            }
            "autoCreateGroups" | "auto_create_group" => {
                self.auto_create_group = parse_bool(key, value)?
            }
            "startId" | "start_id" => self.start_id = value.to_string(),
            "headerFilters" | "header_filters" => self.header_filters = value.to_string(),
            "serviceName" | "service_name" => self.service_name = Some(value.to_string()),
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown endpoint parameter '{}'",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Check the settings every endpoint needs.
    pub fn validate_for_producer(&self) -> Result<(), BridgeError> {
        if self.stream.trim().is_empty() {
            return Err(BridgeError::config("stream key is required"));
        }
        Ok(())
    }

    /// Check the settings a consumer needs: stream, group and events.
    pub fn validate_for_consumer(&self) -> Result<(), BridgeError> {
        self.validate_for_producer()?;

        if is_blank(self.group.as_deref()) {
            return Err(BridgeError::config(format!(
                "consumer group is required for stream '{}'",
                self.stream
            )));
        }
        if AllowedEvents::parse(self.event_list()).is_empty() {
            return Err(BridgeError::config(format!(
                "events are required for consumers of stream '{}'",
                self.stream
            )));
        }
        if self.batch_size == 0 {
            return Err(BridgeError::config("batch_size must be at least 1"));
        }
        Ok(())
    }

    /// Group name, or an empty string when unset.
    pub fn group_name(&self) -> &str {
        self.group.as_deref().unwrap_or_default()
    }

    /// Event list, or an empty string when unset.
    pub fn event_list(&self) -> &str {
        self.events.as_deref().unwrap_or_default()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| {
        ConfigError::ValidationError(format!("Invalid value '{}' for '{}'", value, key))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "Invalid boolean '{}' for '{}'",
            value, key
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointEntry {
    Uri(String),
    Table(EndpointConfig),
}

fn deserialize_endpoints<'de, D>(deserializer: D) -> Result<Vec<EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<EndpointEntry>::deserialize(deserializer)?;
    entries
        .into_iter()
        .map(|entry| match entry {
            EndpointEntry::Uri(uri) => {
                EndpointConfig::from_uri(&uri).map_err(serde::de::Error::custom)
            }
            EndpointEntry::Table(endpoint) => Ok(endpoint),
        })
        .collect()
}

impl BridgeConfig {
    /// Load configuration from the default path or `STREAMBRIDGE_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            consumers = config.consumers.len(),
            producers = config.producers.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate TOML text, substituting `${VAR}` references first.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.url.contains("${") {
            warn!(
                url = %self.redis.url,
                "Redis URL contains unsubstituted environment variable"
            );
        }

        for consumer in &self.consumers {
            consumer
                .validate_for_consumer()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        for producer in &self.producers {
            producer
                .validate_for_producer()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        Ok(())
    }

    /// Service name for a producer endpoint: its own, else the bridge default.
    pub fn service_name_for(&self, endpoint: &EndpointConfig) -> Option<String> {
        endpoint
            .service_name
            .clone()
            .or_else(|| self.bridge.service_name.clone())
    }
}

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let Some(pattern) = env_var_pattern() else {
        return content.to_string();
    };

    pattern
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
