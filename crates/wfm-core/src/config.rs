//! Migration configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wfm_tasks::PoolConfig;

/// Worker pool, paging and failure policy for migrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Concurrent migration workers
    pub workers: usize,
    /// Migrations that may wait for a worker before new ones are rejected
    pub queue_capacity: usize,
    /// Issues fetched per search page
    pub page_size: usize,
    /// How long finished migration results stay pollable
    pub task_retention_secs: u64,
    /// Abort once this many issues failed; `None` never aborts
    pub max_failed_issues: Option<usize>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 16,
            page_size: 100,
            task_retention_secs: 3600,
            max_failed_issues: None,
        }
    }
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention_secs = retention.as_secs();
        self
    }

    /// With a failure threshold that aborts the migration
    #[inline]
    #[must_use]
    pub fn with_max_failed_issues(mut self, max: usize) -> Self {
        self.max_failed_issues = Some(max);
        self
    }

    /// Parse from TOML; missing keys take their defaults
    ///
    /// # Errors
    /// `Parse` on malformed TOML, `Invalid` if a size is zero.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Reject sizes that would stall the pool or the pager
    ///
    /// # Errors
    /// `Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.task_retention_secs == 0 {
            return Err(ConfigError::Invalid("task_retention_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Task manager settings derived from this config
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            // finished results must outlive at least one poll
            retention: Duration::from_secs(self.task_retention_secs.max(1)),
        }
    }
}
