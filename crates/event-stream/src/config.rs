//! Stream configuration.
//!
//! Queue capacity, worker pool size, tier start stagger and the dead-letter
//! destination. Configuration can be loaded from environment variables with
//! defaults matching a small single-process deployment.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of each tier queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Default number of workers per tier.
pub const DEFAULT_WORKERS_PER_PRIORITY: usize = 8;

/// Default delay between starting consecutive tier pools.
pub const DEFAULT_TIER_STAGGER: Duration = Duration::from_millis(10);

/// Default dead-letter log file.
pub const DEFAULT_DEAD_LETTER_PATH: &str = "dead_letter_logs.json";

/// Event stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of each of the three tier queues.
    pub queue_capacity: usize,

    /// Number of worker tasks serving each tier.
    pub workers_per_priority: usize,

    /// Delay between starting the high, medium and low pools.
    ///
    /// Biases early processing toward higher tiers. Zero disables it.
    #[serde(with = "duration_millis")]
    pub tier_stagger: Duration,

    /// Path of the newline-delimited JSON dead-letter log.
    pub dead_letter_path: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers_per_priority: DEFAULT_WORKERS_PER_PRIORITY,
            tier_stagger: DEFAULT_TIER_STAGGER,
            dead_letter_path: PathBuf::from(DEFAULT_DEAD_LETTER_PATH),
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENT_STREAM_QUEUE_CAPACITY`: Capacity per tier (default: 512)
    /// - `EVENT_STREAM_WORKERS_PER_PRIORITY`: Workers per tier (default: 8)
    /// - `EVENT_STREAM_TIER_STAGGER_MS`: Tier start stagger in ms (default: 10)
    /// - `EVENT_STREAM_DEAD_LETTER_PATH`: Dead-letter log path (default: dead_letter_logs.json)
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            queue_capacity: std::env::var("EVENT_STREAM_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.queue_capacity),
            workers_per_priority: std::env::var("EVENT_STREAM_WORKERS_PER_PRIORITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.workers_per_priority),
            tier_stagger: std::env::var("EVENT_STREAM_TIER_STAGGER_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.tier_stagger),
            dead_letter_path: std::env::var("EVENT_STREAM_DEAD_LETTER_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.dead_letter_path),
        }
    }

    /// Set the queue capacity per tier.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the number of workers per tier.
    pub fn with_workers_per_priority(mut self, workers: usize) -> Self {
        self.workers_per_priority = workers;
        self
    }

    /// Set the tier start stagger.
    pub fn with_tier_stagger(mut self, stagger: Duration) -> Self {
        self.tier_stagger = stagger;
        self
    }

    /// Set the dead-letter log path.
    pub fn with_dead_letter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dead_letter_path = path.into();
        self
    }

    /// Total number of workers across all tiers.
    pub fn total_workers(&self) -> usize {
        self.workers_per_priority * 3
    }

    /// Validate the configuration.
    ///
    /// Queues and worker pools must be non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.workers_per_priority == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers_per_priority".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.queue_capacity, 512);
        assert_eq!(config.workers_per_priority, 8);
        assert_eq!(config.tier_stagger, Duration::from_millis(10));
        assert_eq!(config.dead_letter_path, PathBuf::from("dead_letter_logs.json"));
        assert_eq!(config.total_workers(), 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = StreamConfig::default().with_queue_capacity(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = StreamConfig::default().with_workers_per_priority(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_stagger_in_millis() {
        let config = StreamConfig::default().with_tier_stagger(Duration::from_millis(25));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["tier_stagger"], 25);

        let parsed: StreamConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_serde_stagger_saturates() {
        let config = StreamConfig::default().with_tier_stagger(Duration::MAX);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["tier_stagger"], u64::MAX);
    }
}
