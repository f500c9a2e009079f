use std::path::Path;
use std::time::Duration;

use gatehouse_index::IndexOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub index: IndexConfig,
    pub log: LogConfig,
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub url: String,
    pub name: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub bulk_size: usize,
    pub browse_permission: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub otlp_endpoint: String,
    pub service_name: String,
    pub sample_rate: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/gatehouse".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            name: gatehouse_index::config::DEFAULT_INDEX_NAME.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 5,
            bulk_size: crate::indexer::DEFAULT_BULK_SIZE,
            browse_permission: gatehouse_core::keys::USER.to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "gatehouse".to_string(),
            sample_rate: 1.0,
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEHOUSE_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_INDEX_URL") {
            self.index.url = v;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_INDEX_NAME") {
            self.index.name = v;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_INDEX_BULK_SIZE")
            && let Ok(n) = v.parse()
        {
            self.index.bulk_size = n;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("GATEHOUSE_TRACING_ENABLED")
            && let Ok(enabled) = v.parse()
        {
            self.tracing.enabled = enabled;
        }
        if let Ok(v) = std::env::var("GATEHOUSE_OTLP_ENDPOINT") {
            self.tracing.otlp_endpoint = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if self.index.url.is_empty() {
            return Err(ConfigError::Validation(
                "index.url must not be empty".to_string(),
            ));
        }
        if self.index.name.is_empty() {
            return Err(ConfigError::Validation(
                "index.name must not be empty".to_string(),
            ));
        }
        if self.index.bulk_size == 0 {
            return Err(ConfigError::Validation(
                "index.bulk_size must be non-zero".to_string(),
            ));
        }
        if self.index.browse_permission.is_empty() {
            return Err(ConfigError::Validation(
                "index.browse_permission must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracing.sample_rate) {
            return Err(ConfigError::Validation(
                "tracing.sample_rate must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_index_options(&self) -> IndexOptions {
        IndexOptions {
            index_name: self.index.name.clone(),
            timeout: Duration::from_secs(self.index.timeout_secs),
            connect_timeout: Duration::from_secs(self.index.connect_timeout_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
