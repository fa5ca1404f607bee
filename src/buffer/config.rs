use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default number of cached pages
pub const DEFAULT_PAGES: usize = 50;

/// How long a transaction may wait for locks, measured from its first page request
pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_millis(300);

/// Upper bound on a single wait between lock retries
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Buffer pool capacity must be at least one page")]
    ZeroCapacity,

    #[error("Poll interval must be non-zero")]
    ZeroPollInterval,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Buffer pool settings. Durations are stored in JSON as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    #[serde(rename = "abort_timeout_ms", with = "millis")]
    pub abort_timeout: Duration,
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PAGES,
            abort_timeout: DEFAULT_ABORT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.abort_timeout, Duration::from_millis(300));
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"capacity": 8, "abort_timeout_ms": 1000}"#).unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.abort_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_from_json_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pool.json");
        fs::write(&path, r#"{"capacity": 2, "poll_interval_ms": 25}"#).unwrap();

        let config = PoolConfig::from_json_file(&path).unwrap();
        assert_eq!(config.capacity, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pool.json");
        fs::write(&path, r#"{"capacity": 0}"#).unwrap();

        let result = PoolConfig::from_json_file(&path);
        assert!(matches!(result, Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_serialize_as_millis() {
        let config = PoolConfig::with_capacity(4).abort_timeout(Duration::from_millis(750));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["capacity"], 4);
        assert_eq!(json["abort_timeout_ms"], 750);
        assert_eq!(json["poll_interval_ms"], 200);
    }
}
