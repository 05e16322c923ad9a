use crate::error::{FraudGraphError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub graph: GraphConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Graph store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    /// How long SQLite waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Upper bound for one store operation, including the blocking hop
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Minimum OPERATED_BY out-degree for a phone to count as a scam ring
    #[serde(default = "default_ring_threshold")]
    pub ring_threshold: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            consumer_group: default_consumer_group(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Deployment designation (gates destructive operations)
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

/// External classifier (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_classifier_api_key_env")]
    pub api_key_env: String,
    /// Confidence above which a scam verdict triggers the reporting advice
    #[serde(default = "default_action_confidence")]
    pub action_confidence: f64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_ring_threshold() -> usize {
    2
}

fn default_partitions() -> u32 {
    4
}

fn default_consumer_group() -> String {
    "$Default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_classifier_base_url() -> String {
    "https://models.inference.ai.azure.com".to_string()
}

fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_classifier_api_key_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_action_confidence() -> f64 {
    0.7
}

fn default_http_port() -> u16 {
    7071
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in FRAUDGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    ///
    /// The `ENV` environment variable overrides `deployment.environment`.
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("FRAUDGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            FraudGraphError::Configuration(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&config_str)?;

        if let Ok(env) = std::env::var("ENV") {
            if !env.trim().is_empty() {
                config.deployment.environment = env.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).map_err(|e| {
            FraudGraphError::Configuration(format!("Failed to parse config.toml: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.graph.db_path.as_os_str().is_empty() {
            return Err(FraudGraphError::Configuration(
                "graph.db_path must be set".to_string(),
            ));
        }

        if self.graph.ring_threshold == 0 {
            return Err(FraudGraphError::Configuration(
                "graph.ring_threshold must be greater than 0".to_string(),
            ));
        }

        if self.graph.operation_timeout_ms == 0 {
            return Err(FraudGraphError::Configuration(
                "graph.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.ingest.partitions == 0 {
            return Err(FraudGraphError::Configuration(
                "ingest.partitions must be greater than 0".to_string(),
            ));
        }

        if self.ingest.consumer_group.trim().is_empty() {
            return Err(FraudGraphError::Configuration(
                "ingest.consumer_group must not be empty".to_string(),
            ));
        }

        if let Some(classifier) = &self.classifier {
            if !(0.0..=1.0).contains(&classifier.action_confidence) {
                return Err(FraudGraphError::Configuration(
                    "classifier.action_confidence must be between 0.0 and 1.0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.graph.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.graph.migrations_dir
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.graph.busy_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.graph.operation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.ingest.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.ingest.retry_backoff_ms)
    }
}
