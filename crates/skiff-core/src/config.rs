//! Pool configuration

use crate::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a container pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of containers checked out at once
    pub max_active: usize,

    /// Maximum number of idle containers kept for reuse
    pub max_idle: usize,

    /// Run the background sweeper
    pub gc_enabled: bool,

    /// Minimum idle age before a container is eligible for collection
    pub gc_threshold: Duration,

    /// Interval between background sweeps
    pub gc_frequency: Duration,

    /// Prefix for human-readable container names
    pub name_prefix: String,

    /// Upper bound on running an action's initialization code
    pub init_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 4,
            max_idle: 10,
            gc_enabled: true,
            gc_threshold: Duration::from_secs(600),
            gc_frequency: Duration::from_secs(1),
            name_prefix: "skiff".into(),
            init_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            SkiffError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded pool config");
        Ok(config)
    }

    /// Reject bounds the pool cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(SkiffError::Config("max_active must be at least 1".into()));
        }
        if self.gc_frequency.is_zero() {
            return Err(SkiffError::Config("gc_frequency must be non-zero".into()));
        }
        if self.init_timeout.is_zero() {
            return Err(SkiffError::Config("init_timeout must be non-zero".into()));
        }
        if self.name_prefix.is_empty() || !self.name_prefix.chars().all(is_name_char) {
            return Err(SkiffError::Config(format!(
                "name_prefix must be non-empty and alphanumeric, got {:?}",
                self.name_prefix
            )));
        }
        Ok(())
    }
}

/// Characters allowed in a container name
#[must_use]
pub const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Builder for `PoolConfig`
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    #[must_use]
    pub fn max_active(mut self, n: usize) -> Self {
        self.config.max_active = n;
        self
    }

    #[must_use]
    pub fn max_idle(mut self, n: usize) -> Self {
        self.config.max_idle = n;
        self
    }

    #[must_use]
    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.config.gc_enabled = enabled;
        self
    }

    #[must_use]
    pub fn gc_threshold(mut self, threshold: Duration) -> Self {
        self.config.gc_threshold = threshold;
        self
    }

    #[must_use]
    pub fn gc_frequency(mut self, frequency: Duration) -> Self {
        self.config.gc_frequency = frequency;
        self
    }

    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

/// Get the default config file from the `SKIFF_CONFIG` env var, if set
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("SKIFF_CONFIG").map(PathBuf::from)
}
