//! Service configuration.
//!
//! Loaded once at startup from an optional `config.*` file plus `DOCPIPE__*`
//! environment variables, then handed to each component as an explicit value.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub rasterizer: RasterizerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// How long in-flight extractions may run after a shutdown signal
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Holds the SQLite database and the blob root
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docpipe.db")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Vision completion endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_analyzer_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Extra attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `(n + 1)` units before the next try
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AnalyzerConfig {
    pub fn retry_backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: default_analyzer_url(),
            api_key: String::new(),
            model: default_analyzer_model(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// External PDF rasterizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RasterizerConfig {
    /// Executable invoked as `<program> [args..] [-density N] <input.pdf> <output pattern>`
    #[serde(default = "default_rasterizer_program")]
    pub program: String,

    /// Leading arguments, e.g. `["convert"]` for GraphicsMagick's `gm`
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub density: Option<u32>,

    #[serde(default = "default_rasterizer_timeout_secs")]
    pub timeout_secs: u64,
}

impl RasterizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            program: default_rasterizer_program(),
            args: Vec::new(),
            density: None,
            timeout_secs: default_rasterizer_timeout_secs(),
        }
    }
}

/// Size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_document_size_bytes: default_max_document_size(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `config.*` (optional) and `DOCPIPE__*` env vars
    pub fn load() -> ServiceResult<Self> {
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("DOCPIPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })
    }

    /// Defaults rooted at `data_dir`, used by tests
    #[cfg(test)]
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: default_server(),
            storage: StorageConfig {
                data_dir: data_dir.into(),
            },
            analyzer: AnalyzerConfig::default(),
            rasterizer: RasterizerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        shutdown_grace_secs: default_shutdown_grace_secs(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_analyzer_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_analyzer_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_rasterizer_program() -> String {
    "convert".to_string()
}

fn default_rasterizer_timeout_secs() -> u64 {
    120
}

fn default_max_document_size() -> u64 {
    50 * 1024 * 1024
}
