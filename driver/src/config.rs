/// Driver configuration.

use core::time::Duration;

use crate::error::{DriverError, Result};

/// Default number of blocks the cache holds.
pub const DEFAULT_CACHE_CAPACITY: u16 = 128;

/// Environment variable overriding the cache capacity.
pub const ENV_CACHE_CAPACITY: &str = "SG_CACHE_CAPACITY";
/// Environment variable setting the post timeout in milliseconds.
pub const ENV_POST_TIMEOUT_MS: &str = "SG_POST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Maximum number of blocks kept in the block cache.
    pub cache_capacity: u16,
    /// How long a single request/response exchange may take. `None` waits
    /// forever.
    pub post_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            post_timeout: None,
        }
    }
}

impl DriverConfig {
    pub fn with_cache_capacity(mut self, capacity: u16) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(DriverError::InvalidConfig(String::from(
                "cache capacity must be at least 1",
            )));
        }
        if self.post_timeout == Some(Duration::ZERO) {
            return Err(DriverError::InvalidConfig(String::from(
                "post timeout must be non-zero",
            )));
        }
        Ok(())
    }

    /// Defaults overridden by `SG_CACHE_CAPACITY` and `SG_POST_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CACHE_CAPACITY) {
            config.cache_capacity = raw.trim().parse().map_err(|_| {
                DriverError::InvalidConfig(format!("{}={:?} is not a u16", ENV_CACHE_CAPACITY, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_POST_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                DriverError::InvalidConfig(format!(
                    "{}={:?} is not a millisecond count",
                    ENV_POST_TIMEOUT_MS, raw
                ))
            })?;
            config.post_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}
