//! Result store configuration

use crate::aggregation::Sizes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// How long a result store or its search process may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lifespan {
    /// Expire this long after the last access
    #[serde(default)]
    pub time_to_idle: Option<Duration>,

    /// Expire this long after creation
    #[serde(default)]
    pub time_to_live: Option<Duration>,

    /// Closing the owning tab ends it
    #[serde(default)]
    pub destroy_on_tab_close: bool,

    /// Closing the owning window ends it
    #[serde(default)]
    pub destroy_on_window_close: bool,
}

impl Lifespan {
    pub fn with_time_to_idle(mut self, ttl: Duration) -> Self {
        self.time_to_idle = Some(ttl);
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Whether something created at `age` ago and last used `idle` ago has
    /// outlived this lifespan.
    pub fn is_expired(&self, age: Duration, idle: Duration) -> bool {
        self.time_to_live.map_or(false, |ttl| age >= ttl)
            || self.time_to_idle.map_or(false, |tti| idle >= tti)
    }
}

/// Lifespans of a store and of the search process feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifespanSettings {
    pub store: Lifespan,
    pub search_process: Lifespan,
}

/// Result store registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResultStoreConfig {
    /// Per-depth row limits, e.g. `1000000,100,10,1`
    #[validate(custom(function = "validate_sizes"))]
    #[serde(default = "default_max_results")]
    pub default_max_results: String,

    /// Seconds between sweeps for expired stores
    #[validate(range(min = 1))]
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Destroy a store this long after its last poll
    #[serde(default = "default_store_time_to_idle")]
    pub store_time_to_idle_secs: Option<u64>,

    /// Destroy a store this long after creation
    #[serde(default)]
    pub store_time_to_live_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub store_destroy_on_tab_close: bool,

    #[serde(default = "default_true")]
    pub store_destroy_on_window_close: bool,

    /// Stop a search this long after its last poll
    #[serde(default)]
    pub process_time_to_idle_secs: Option<u64>,

    /// Stop a search this long after it started
    #[serde(default)]
    pub process_time_to_live_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub process_destroy_on_tab_close: bool,

    #[serde(default = "default_true")]
    pub process_destroy_on_window_close: bool,

    /// Seconds a torn-down key keeps answering polls as finished instead
    /// of starting a new search
    #[serde(default = "default_retired_key_retention")]
    pub retired_key_retention_secs: u64,

    /// Snapshot size above which renders sort in parallel
    #[validate(range(min = 1))]
    #[serde(default = "default_parallel_sort_threshold")]
    pub parallel_sort_threshold: usize,
}

fn default_max_results() -> String {
    "1000000,100,10,1".to_string()
}

fn default_eviction_interval() -> u64 {
    10
}

fn default_store_time_to_idle() -> Option<u64> {
    Some(3600)
}

fn default_retired_key_retention() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_parallel_sort_threshold() -> usize {
    10_000
}

fn validate_sizes(value: &str) -> Result<(), ValidationError> {
    match value.parse::<Sizes>() {
        Ok(sizes) if sizes.as_slice().iter().all(|size| *size > 0) => Ok(()),
        _ => Err(ValidationError::new("invalid_result_sizes")),
    }
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            eviction_interval_secs: default_eviction_interval(),
            store_time_to_idle_secs: default_store_time_to_idle(),
            store_time_to_live_secs: None,
            store_destroy_on_tab_close: true,
            store_destroy_on_window_close: true,
            process_time_to_idle_secs: None,
            process_time_to_live_secs: None,
            process_destroy_on_tab_close: true,
            process_destroy_on_window_close: true,
            retired_key_retention_secs: default_retired_key_retention(),
            parallel_sort_threshold: default_parallel_sort_threshold(),
        }
    }
}

impl ResultStoreConfig {
    /// Parsed default row limits; an unparsable value means unlimited.
    pub fn max_results(&self) -> Sizes {
        self.default_max_results.parse().unwrap_or_default()
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }

    pub fn retired_key_retention(&self) -> Duration {
        Duration::from_secs(self.retired_key_retention_secs)
    }

    /// Lifespans given to new stores.
    pub fn lifespans(&self) -> LifespanSettings {
        LifespanSettings {
            store: Lifespan {
                time_to_idle: self.store_time_to_idle_secs.map(Duration::from_secs),
                time_to_live: self.store_time_to_live_secs.map(Duration::from_secs),
                destroy_on_tab_close: self.store_destroy_on_tab_close,
                destroy_on_window_close: self.store_destroy_on_window_close,
            },
            search_process: Lifespan {
                time_to_idle: self.process_time_to_idle_secs.map(Duration::from_secs),
                time_to_live: self.process_time_to_live_secs.map(Duration::from_secs),
                destroy_on_tab_close: self.process_destroy_on_tab_close,
                destroy_on_window_close: self.process_destroy_on_window_close,
            },
        }
    }
}

/// Builder for ResultStoreConfig
pub struct ResultStoreConfigBuilder {
    config: ResultStoreConfig,
}

impl ResultStoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResultStoreConfig::default(),
        }
    }

    pub fn default_max_results(mut self, sizes: impl Into<String>) -> Self {
        self.config.default_max_results = sizes.into();
        self
    }

    pub fn eviction_interval_secs(mut self, secs: u64) -> Self {
        self.config.eviction_interval_secs = secs;
        self
    }

    pub fn store_time_to_idle_secs(mut self, secs: Option<u64>) -> Self {
        self.config.store_time_to_idle_secs = secs;
        self
    }

    pub fn store_time_to_live_secs(mut self, secs: Option<u64>) -> Self {
        self.config.store_time_to_live_secs = secs;
        self
    }

    pub fn process_time_to_idle_secs(mut self, secs: Option<u64>) -> Self {
        self.config.process_time_to_idle_secs = secs;
        self
    }

    pub fn process_time_to_live_secs(mut self, secs: Option<u64>) -> Self {
        self.config.process_time_to_live_secs = secs;
        self
    }

    pub fn destroy_on_tab_close(mut self, store: bool, process: bool) -> Self {
        self.config.store_destroy_on_tab_close = store;
        self.config.process_destroy_on_tab_close = process;
        self
    }

    pub fn destroy_on_window_close(mut self, store: bool, process: bool) -> Self {
        self.config.store_destroy_on_window_close = store;
        self.config.process_destroy_on_window_close = process;
        self
    }

    pub fn retired_key_retention_secs(mut self, secs: u64) -> Self {
        self.config.retired_key_retention_secs = secs;
        self
    }

    pub fn parallel_sort_threshold(mut self, threshold: usize) -> Self {
        self.config.parallel_sort_threshold = threshold;
        self
    }

    pub fn build(self) -> ResultStoreConfig {
        self.config
    }
}

impl Default for ResultStoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResultStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_results().size(0), 1_000_000);
        assert_eq!(
            config.lifespans().store.time_to_idle,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.lifespans().search_process.time_to_idle, None);
        assert_eq!(config.retired_key_retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = ResultStoreConfigBuilder::new()
            .default_max_results("10,abc")
            .build();
        assert!(config.validate().is_err());

        let config = ResultStoreConfigBuilder::new().eviction_interval_secs(0).build();
        assert!(config.validate().is_err());

        let config = ResultStoreConfigBuilder::new().default_max_results("10,0").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lifespan_expiry() {
        let lifespan = Lifespan::default()
            .with_time_to_idle(Duration::from_secs(10))
            .with_time_to_live(Duration::from_secs(60));
        assert!(!lifespan.is_expired(Duration::from_secs(30), Duration::from_secs(5)));
        assert!(lifespan.is_expired(Duration::from_secs(30), Duration::from_secs(10)));
        assert!(lifespan.is_expired(Duration::from_secs(60), Duration::from_secs(0)));
        assert!(!Lifespan::default().is_expired(Duration::MAX, Duration::MAX));
    }
}
