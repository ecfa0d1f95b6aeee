//! Pipeline configuration
//!
//! Loaded once at startup from a YAML file, overridden by `WDP_*` environment
//! variables, validated, and then passed by reference into every stage.
//!
//! ```yaml
//! subjects: [Paris, Cairo, Tokyo]
//! source:
//!   url: https://api.openweathermap.org/data/2.5/weather
//!   api_key: changeme
//! sink:
//!   location: ./output/weather.csv
//! rate_limit_delay_ms: 1000
//! database:
//!   url: postgresql://localhost/weather
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wdp_common::types::Subject;

use crate::error::{PipelineError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default delay between two subject fetches.
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 1000;

/// Default unit system requested from the source.
pub const DEFAULT_UNITS: &str = "metric";

/// Default HTTP timeout for one fetch.
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 10;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/wdp";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Subjects fetched on every run, in order
    pub subjects: Vec<Subject>,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// External weather source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

/// Tabular sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub location: PathBuf,
}

/// Staging database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_database_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_database_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_rate_limit_delay_ms() -> u64 {
    DEFAULT_RATE_LIMIT_DELAY_MS
}

fn default_units() -> String {
    DEFAULT_UNITS.to_string()
}

fn default_source_timeout_secs() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_SECS
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_database_max_connections() -> u32 {
    DEFAULT_DATABASE_MAX_CONNECTIONS
}

fn default_database_connect_timeout_secs() -> u64 {
    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file, apply environment overrides, and
    /// validate the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        dotenvy::dotenv().ok();

        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::from_yaml(&content)?.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text without validation.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| PipelineError::config(format!("Failed to parse YAML: {}", e)))
    }

    /// Apply environment overrides
    ///
    /// Environment variables:
    /// - `WDP_SUBJECTS`: comma-separated subject list
    /// - `WDP_SOURCE_URL`, `WDP_API_KEY`: source endpoint and key
    /// - `WDP_SINK_LOCATION`: sink file path
    /// - `WDP_RATE_LIMIT_DELAY_MS`: delay between fetches
    /// - `DATABASE_URL`: staging database
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(subjects) = std::env::var("WDP_SUBJECTS") {
            self.subjects = subjects
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Subject::new)
                .collect::<wdp_common::Result<Vec<_>>>()?;
        }

        if let Ok(url) = std::env::var("WDP_SOURCE_URL") {
            self.source.url = url;
        }

        if let Ok(key) = std::env::var("WDP_API_KEY") {
            self.source.api_key = key;
        }

        if let Ok(location) = std::env::var("WDP_SINK_LOCATION") {
            self.sink.location = PathBuf::from(location);
        }

        if let Ok(delay) = std::env::var("WDP_RATE_LIMIT_DELAY_MS") {
            self.rate_limit_delay_ms = delay.parse().map_err(|_| {
                PipelineError::config(format!("WDP_RATE_LIMIT_DELAY_MS is not a number: {delay}"))
            })?;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.subjects.is_empty() {
            return Err(PipelineError::config("subjects cannot be empty"));
        }
        if self.source.url.trim().is_empty() {
            return Err(PipelineError::config("source.url cannot be empty"));
        }
        if self.source.api_key.trim().is_empty() {
            return Err(PipelineError::config("source.api_key cannot be empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(PipelineError::config("source.timeout_secs must be greater than 0"));
        }
        if self.sink.location.as_os_str().is_empty() {
            return Err(PipelineError::config("sink.location cannot be empty"));
        }
        if self.database.url.trim().is_empty() {
            return Err(PipelineError::config("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(PipelineError::config("database.max_connections must be greater than 0"));
        }
        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
