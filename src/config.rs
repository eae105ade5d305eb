//! Configuration loading and types for bucketlens.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the HTTP listener, the storage API clients, search behaviour,
//! logging and metrics.  Every field has a default, so an empty or missing
//! file yields a working configuration.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage API settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Search and table-view settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Storage API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `aws` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Region of the default client; also the fallback when a bucket's
    /// region cannot be resolved.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,

    /// Force path-style URL addressing.
    #[serde(default)]
    pub force_path_style: bool,

    /// In-memory backend settings.
    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            default_region: default_region(),
            endpoint_url: String::new(),
            force_path_style: false,
            memory: MemoryStorageConfig::default(),
        }
    }
}

impl StorageConfig {
    /// The endpoint override, if one is configured.
    pub fn endpoint(&self) -> Option<String> {
        Some(self.endpoint_url.clone()).filter(|e| !e.is_empty())
    }
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// YAML fixture to seed buckets and objects from.
    #[serde(default)]
    pub fixture: Option<String>,
}

/// Search configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Maximum concurrent metadata fetches within one page.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall deadline of a full-bucket search, in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Rows of the table view that get metadata.
    #[serde(default = "default_table_metadata_limit")]
    pub table_metadata_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_search_timeout(),
            table_metadata_limit: default_table_metadata_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
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

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "::".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_search_timeout() -> u64 {
    300
}

fn default_table_metadata_limit() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  Empty text yields defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Apply the `AWS_REGION` and `PORT` environment overrides.
pub fn apply_env_overrides(
    config: &mut Config,
    aws_region: Option<String>,
    port: Option<String>,
) -> anyhow::Result<()> {
    if let Some(region) = aws_region.filter(|r| !r.is_empty()) {
        config.storage.default_region = region;
    }
    if let Some(port) = port.filter(|p| !p.is_empty()) {
        config.server.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PORT '{port}': {e}"))?;
    }
    Ok(())
}
