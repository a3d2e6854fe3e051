use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Error reading config file")]
    File(#[from] std::io::Error),
    #[error("Error parsing config TOML")]
    TomlParsing(#[from] toml::de::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Maximum number of records per history tier before it gets consolidated into
/// the next coarser tier. The day tier is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub second: usize,
    pub minute: usize,
    pub ten_minute: usize,
    pub hour: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            second: 120,
            minute: 20,
            ten_minute: 12,
            hour: 48,
        }
    }
}

/// Cardinality caps for the route statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteLimits {
    pub max_domains: usize,
    pub max_hosts_per_domain: usize,
    pub max_user_agents: usize,
    pub max_forwarders: usize,
}

impl Default for RouteLimits {
    fn default() -> Self {
        RouteLimits {
            max_domains: 500,
            max_hosts_per_domain: 2000,
            max_user_agents: 100,
            max_forwarders: 100,
        }
    }
}

/**
 * Tunables of a stats session. Every field has a default, so an empty TOML file
 * (or none at all) is a valid config:
 *
 * ```toml
 * stale_container_threshold = 80   # seconds
 * snapshot_interval = 1000         # milliseconds
 * history_tick = 1                 # seconds
 * route_tracking_enabled = true
 * max_instance_index = 10000
 *
 * [history]
 * second = 120
 *
 * [route_limits]
 * max_user_agents = 100
 * ```
 *
 * The sliding windows (1s, 10s, 60s) are not configurable.
 */
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Containers that haven't reported for longer than this are hidden from snapshots
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub stale_container_threshold: Duration,
    /// How often a new snapshot is published
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub snapshot_interval: Duration,
    /// How often a history record is taken
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub history_tick: Duration,
    pub route_tracking_enabled: bool,
    /// Crash records kept per app
    pub max_crash_records: usize,
    /// Events naming a higher container instance index are dropped as malformed
    pub max_instance_index: usize,
    /// Queue size of each firehose stream's channel
    pub stream_queue_size: usize,
    pub history: HistoryConfig,
    pub route_limits: RouteLimits,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            stale_container_threshold: Duration::from_secs(80),
            snapshot_interval: Duration::from_millis(1000),
            history_tick: Duration::from_secs(1),
            route_tracking_enabled: true,
            max_crash_records: 25,
            max_instance_index: 10_000,
            stream_queue_size: 1024,
            history: HistoryConfig::default(),
            route_limits: RouteLimits::default(),
        }
    }
}

impl StatsConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<StatsConfig, ConfigError> {
        let config: StatsConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<StatsConfig, ConfigError> {
        let toml_str = std::fs::read_to_string(path)?;
        StatsConfig::from_toml_str(&toml_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }
        if self.stale_container_threshold.is_zero() {
            return invalid("stale_container_threshold", "must be positive");
        }
        if self.snapshot_interval.is_zero() {
            return invalid("snapshot_interval", "must be positive");
        }
        if self.history_tick.is_zero() {
            return invalid("history_tick", "must be positive");
        }
        if self.stream_queue_size == 0 {
            return invalid("stream_queue_size", "must be positive");
        }
        let caps = [
            ("history.second", self.history.second),
            ("history.minute", self.history.minute),
            ("history.ten_minute", self.history.ten_minute),
            ("history.hour", self.history.hour),
        ];
        for (field, cap) in caps {
            if cap < 2 {
                return invalid(field, "needs room for at least 2 records");
            }
        }
        Ok(())
    }

    /// The staleness threshold as a chrono Duration for comparing timestamps
    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_container_threshold)
            .unwrap_or_else(|_| chrono::Duration::weeks(52))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StatsConfig::from_toml_str("").unwrap();
        assert_eq!(config, StatsConfig::default());
        assert_eq!(config.stale_container_threshold, Duration::from_secs(80));
        assert_eq!(config.stale_threshold(), chrono::Duration::seconds(80));
        assert_eq!(config.history.second, 120);
        assert_eq!(config.route_limits.max_user_agents, 100);
        assert_eq!(config.max_instance_index, 10_000);
    }

    #[test]
    fn test_partial_override() {
        let config = StatsConfig::from_toml_str(
            r#"
            stale_container_threshold = 30
            snapshot_interval = 250
            route_tracking_enabled = false

            [history]
            second = 10

            [route_limits]
            max_domains = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.stale_container_threshold, Duration::from_secs(30));
        assert_eq!(config.snapshot_interval, Duration::from_millis(250));
        assert!(!config.route_tracking_enabled);
        assert_eq!(config.history.second, 10);
        assert_eq!(config.history.minute, 20);
        assert_eq!(config.route_limits.max_domains, 3);
        assert_eq!(config.route_limits.max_hosts_per_domain, 2000);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            StatsConfig::from_toml_str("snapshot_interval = 0"),
            Err(ConfigError::Invalid {
                field: "snapshot_interval",
                ..
            })
        ));
        assert!(matches!(
            StatsConfig::from_toml_str("[history]\nhour = 1"),
            Err(ConfigError::Invalid {
                field: "history.hour",
                ..
            })
        ));
        assert!(matches!(
            StatsConfig::from_toml_str("route_tracking_enabled = \"yes\""),
            Err(ConfigError::TomlParsing(_))
        ));
        assert!(matches!(
            StatsConfig::from_toml_file("/no/such/firehose.toml"),
            Err(ConfigError::File(_))
        ));
    }
}
