//! Collector configuration.
//!
//! Configuration is plain data: it can be built programmatically through
//! [`ConfigBuilder`], loaded from YAML, and is validated before a collector
//! accepts it. The error callback is not part of this struct (it is not
//! serializable); it is installed on the collector builder.

use crate::core::retry::RetryConfig;
use crate::core::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete configuration for a metrics collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Period between snapshot ticks
    #[serde(with = "humantime_serde")]
    pub snapshot_interval: Duration,
    /// Minimum recorded events per interval before non-count aggregations
    /// are emitted. Overridable per gauge at construction.
    pub minimum_events: u64,
    /// Prefix prepended to every metric name at attachment
    pub metrics_name_prefix: String,
    /// Tags merged into every instrument's tag set at attachment
    pub default_tags: HashMap<String, String>,
    /// Transport tuning
    pub transport: TransportConfig,
}

/// Transport configuration (batching, backpressure, retry, shutdown)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// When a queue is full: `true` raises `QueueFull` to the enqueuer,
    /// `false` drops the newest batch and surfaces it via the error callback
    pub throw_on_queue_full: bool,
    /// Flush a batch buffer once its payload reaches this many bytes
    pub max_batch_bytes: usize,
    /// Bounded queue capacity, in batches, per endpoint
    pub max_pending_batches: usize,
    /// Retry policy for sends
    pub retry: RetryConfig,
    /// Best-effort drain budget at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// How often instrument metadata is re-emitted
    #[serde(with = "humantime_serde")]
    pub metadata_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            snapshot_interval: Duration::from_secs(30),
            minimum_events: 1,
            metrics_name_prefix: String::new(),
            default_tags: HashMap::new(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            throw_on_queue_full: false,
            max_batch_bytes: 8_000,
            max_pending_batches: 240,
            retry: RetryConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
            metadata_interval: Duration::from_secs(300),
        }
    }
}

impl CollectorConfig {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = CollectorConfig::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_interval.is_zero() {
            return Err(TallyError::config("snapshot_interval must be greater than zero"));
        }

        if !self.metrics_name_prefix.is_empty()
            && !crate::instrument::is_valid_name(&self.metrics_name_prefix)
        {
            return Err(TallyError::InvalidName(self.metrics_name_prefix.clone()));
        }

        for (key, value) in &self.default_tags {
            crate::instrument::validate_tag(key, value)?;
        }

        if self.transport.max_batch_bytes == 0 {
            return Err(TallyError::config("max_batch_bytes must be greater than 0"));
        }

        if self.transport.max_pending_batches == 0 {
            return Err(TallyError::config("max_pending_batches must be greater than 0"));
        }

        if self.transport.retry.max_attempts == 0 {
            return Err(TallyError::config("retry max_attempts must be greater than 0"));
        }

        Ok(())
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: CollectorConfig,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: CollectorConfig::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the snapshot interval
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    /// Set the default minimum-events threshold
    pub fn minimum_events(mut self, count: u64) -> Self {
        self.config.minimum_events = count;
        self
    }

    /// Set the metric name prefix
    pub fn metrics_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.metrics_name_prefix = prefix.into();
        self
    }

    /// Add a default tag merged into every instrument
    pub fn default_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.default_tags.insert(key.into(), value.into());
        self
    }

    /// Set the queue-full policy
    pub fn throw_on_queue_full(mut self, throw: bool) -> Self {
        self.config.transport.throw_on_queue_full = throw;
        self
    }

    /// Set the batch flush threshold in bytes
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.transport.max_batch_bytes = bytes;
        self
    }

    /// Set the per-endpoint queue capacity in batches
    pub fn max_pending_batches(mut self, batches: usize) -> Self {
        self.config.transport.max_pending_batches = batches;
        self
    }

    /// Set the send retry policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.transport.retry = retry;
        self
    }

    /// Set the shutdown drain budget
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.shutdown_timeout = timeout;
        self
    }

    /// Set the metadata re-emission interval
    pub fn metadata_interval(mut self, interval: Duration) -> Self {
        self.config.transport.metadata_interval = interval;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CollectorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CollectorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = CollectorConfig::default();
        config.snapshot_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut config = CollectorConfig::default();
        config.metrics_name_prefix = "app metrics.".to_string();
        assert!(matches!(config.validate(), Err(TallyError::InvalidName(_))));
    }

    #[test]
    fn test_invalid_default_tag_rejected() {
        let mut config = CollectorConfig::default();
        config
            .default_tags
            .insert("host".to_string(), "web 01".to_string());
        assert!(matches!(config.validate(), Err(TallyError::InvalidTag { .. })));
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .snapshot_interval(Duration::from_secs(5))
            .minimum_events(10)
            .metrics_name_prefix("app.")
            .default_tag("host", "web-01")
            .throw_on_queue_full(true)
            .max_pending_batches(16)
            .build();

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));
        assert_eq!(config.minimum_events, 10);
        assert_eq!(config.metrics_name_prefix, "app.");
        assert_eq!(config.default_tags.get("host"), Some(&"web-01".to_string()));
        assert!(config.transport.throw_on_queue_full);
        assert_eq!(config.transport.max_pending_batches, 16);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
snapshot_interval: 15s
minimum_events: 5
metrics_name_prefix: "svc."
default_tags:
  host: web-01
  tier: frontend
transport:
  throw_on_queue_full: true
  max_batch_bytes: 4096
  max_pending_batches: 32
  shutdown_timeout: 2s
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build();

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.snapshot_interval, Duration::from_secs(15));
        assert_eq!(config.minimum_events, 5);
        assert_eq!(config.metrics_name_prefix, "svc.");
        assert_eq!(config.default_tags.get("tier"), Some(&"frontend".to_string()));
        assert!(config.transport.throw_on_queue_full);
        assert_eq!(config.transport.max_batch_bytes, 4096);
        assert_eq!(config.transport.shutdown_timeout, Duration::from_secs(2));
    }
}
