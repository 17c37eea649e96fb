//! Two-level cache configuration

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{cache::TlCache, disk::DEFAULT_FILE_MODE, CacheError, Result};

/// Two-level cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlCacheConfig {
    /// Directory owned by the disk tier
    pub cache_dir: PathBuf,
    /// Memory tier size before pruning kicks in
    pub memory_threshold: usize,
    /// Memory tier TTL when none is requested
    pub default_timeout: Duration,
    /// Disk tier size before pruning kicks in
    pub disk_threshold: usize,
    /// Disk tier TTL; write-through always uses it
    pub disk_timeout: Duration,
    /// Upper bound on the TTL of a value republished after a failed call
    pub degraded_timeout: Duration,
    /// Permission bits of persisted entries (Unix only)
    pub file_mode: u32,
}

impl Default for TlCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tlcache"),
            memory_threshold: 1000,
            default_timeout: Duration::from_secs(300),
            disk_threshold: 100_000,
            disk_timeout: Duration::from_secs(86_400),
            degraded_timeout: Duration::from_secs(60),
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl TlCacheConfig {
    /// Check the configuration before opening a cache
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig {
                message: "cache_dir must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// TTL for republishing a value after a failed call
    ///
    /// The requested timeout (or the memory default), capped at
    /// `degraded_timeout`. A never-expiring request gets the cap.
    pub fn degraded_ttl(&self, requested: Option<Duration>) -> Duration {
        let requested = requested.unwrap_or(self.default_timeout);
        if requested.is_zero() {
            self.degraded_timeout
        } else {
            requested.min(self.degraded_timeout)
        }
    }
}

/// Builder pattern for cache construction
#[derive(Debug, Clone, Default)]
pub struct TlCacheBuilder {
    config: TlCacheConfig,
}

impl TlCacheBuilder {
    /// Create a new cache builder rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: TlCacheConfig {
                cache_dir: cache_dir.into(),
                ..TlCacheConfig::default()
            },
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: TlCacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_threshold(mut self, threshold: usize) -> Self {
        self.config.memory_threshold = threshold;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn disk_threshold(mut self, threshold: usize) -> Self {
        self.config.disk_threshold = threshold;
        self
    }

    pub fn disk_timeout(mut self, timeout: Duration) -> Self {
        self.config.disk_timeout = timeout;
        self
    }

    pub fn degraded_timeout(mut self, timeout: Duration) -> Self {
        self.config.degraded_timeout = timeout;
        self
    }

    pub fn file_mode(mut self, mode: u32) -> Self {
        self.config.file_mode = mode;
        self
    }

    /// Build the cache, creating its directory
    pub async fn build(self) -> Result<TlCache> {
        TlCache::with_config(self.config).await
    }
}
