use crate::search::ResultStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

const ENV_PREFIX: &str = "SRA";
const CONFIG_PATH_VAR: &str = "SRA_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/search-result-aggregator.toml";
const DEFAULTS: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Result store configuration
    #[serde(default)]
    pub result_store: ResultStoreConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> crate::Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::build(config::File::with_name(&config_path).required(false))
    }

    /// Load configuration from a specific file over the defaults
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> crate::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULTS, config::FileFormat::Toml))
            // Override with config file
            .add_source(file)
            // Override with environment variables (prefix: SRA_)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.result_store.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            result_store: ResultStoreConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "search-result-aggregator".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULTS, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.result_store.default_max_results, "1000000,100,10,1");
        assert_eq!(config.result_store.store_time_to_idle_secs, Some(3600));
        assert_eq!(config.observability.service_name, "search-result-aggregator");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[result_store]\ndefault_max_results = \"500,5\"\neviction_interval_secs = 2\n\n[observability]\njson_logs = true"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.result_store.max_results().as_slice(), &[500, 5]);
        assert_eq!(config.result_store.eviction_interval_secs, 2);
        assert!(config.observability.json_logs);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[result_store]\ndefault_max_results = \"ten\"").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(crate::error::AppError::Validation(_))
        ));
    }
}
