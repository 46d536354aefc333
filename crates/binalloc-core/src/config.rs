//! Pool configuration.
//!
//! Defaults can be overridden through the environment:
//! - `BINALLOC_BATCH_SIZE`: blocks requested per refill (default 20).
//! - `BINALLOC_OOM_RETRIES`: how many times the out-of-memory handler may be
//!   invoked for a single request before giving up (default 8).
//! - `BINALLOC_LOG_CAPACITY`: lifecycle records retained (default 256, 0 disables).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_BATCH_SIZE: &str = "BINALLOC_BATCH_SIZE";
pub const ENV_OOM_RETRIES: &str = "BINALLOC_OOM_RETRIES";
pub const ENV_LOG_CAPACITY: &str = "BINALLOC_LOG_CAPACITY";

/// Default number of blocks carved per refill.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default bound on out-of-memory handler invocations per request.
pub const DEFAULT_OOM_RETRY_LIMIT: u32 = 8;

/// Default number of lifecycle records kept.
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Tunables for a [`PoolAllocator`](crate::malloc::PoolAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Blocks requested from the arena on every refill.
    pub batch_size: usize,
    /// Handler invocations allowed per failing system request.
    pub oom_retry_limit: u32,
    /// Lifecycle records retained; the oldest are dropped first.
    pub log_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            oom_retry_limit: DEFAULT_OOM_RETRY_LIMIT,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = parse_number(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_OOM_RETRIES) {
            config.oom_retry_limit = parse_number(ENV_OOM_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_CAPACITY) {
            config.log_capacity = parse_number(ENV_LOG_CAPACITY, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the allocator cannot make progress with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.oom_retry_limit == 0 {
            return Err(ConfigError::ZeroRetryLimit);
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_oom_retry_limit(mut self, limit: u32) -> Self {
        self.oom_retry_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.oom_retry_limit, 8);
        assert_eq!(config.log_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = PoolConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            (ENV_BATCH_SIZE, "32"),
            (ENV_OOM_RETRIES, " 3 "),
            (ENV_LOG_CAPACITY, "0"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.oom_retry_limit, 3);
        assert_eq!(config.log_capacity, 0);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PoolConfig::from_lookup(lookup_from(&[(ENV_OOM_RETRIES, "-1")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                key: ENV_OOM_RETRIES,
                value: "-1".into()
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert_eq!(
            PoolConfig::from_lookup(lookup_from(&[(ENV_BATCH_SIZE, "0")])).unwrap_err(),
            ConfigError::ZeroBatch
        );
        assert_eq!(
            PoolConfig::default().with_oom_retry_limit(0).validate(),
            Err(ConfigError::ZeroRetryLimit)
        );
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: PoolConfig = serde_json::from_str(r#"{"batch_size": 8}"#).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.oom_retry_limit, DEFAULT_OOM_RETRY_LIMIT);
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }
}
