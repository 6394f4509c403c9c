//! Runner configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional YAML
//! file, then `EDGE_RECONCILE_*` environment variables.
//!
//! ```yaml
//! strategy: ordered_retry
//! max_run_count: 5
//! cool_off_unit: 10s
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "EDGE_RECONCILE_";

/// Configuration error for runner setup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("max_run_count must be at least 1")]
    InvalidMaxRunCount,
    #[error("config file '{}' does not exist", path.display())]
    MissingFile { path: PathBuf },
    #[error("failed to load runner config: {0}")]
    Load(#[source] Box<figment::Error>),
}

/// Which plan runner to build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStrategy {
    Ordered,
    #[default]
    OrderedRetry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub strategy: RunnerStrategy,
    /// Attempts allowed per command and deployment before giving up.
    pub max_run_count: u32,
    /// Base of the exponential cool-off, e.g. `"10s"`.
    #[serde(with = "humantime_duration")]
    pub cool_off_unit: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategy: RunnerStrategy::OrderedRetry,
            max_run_count: 5,
            cool_off_unit: Duration::from_secs(10),
        }
    }
}

impl RunnerConfig {
    /// Loads the configuration from defaults, `path` (if any) and the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingFile`] if `path` does not exist,
    /// [`ConfigError::Load`] if a source cannot be parsed, and
    /// [`ConfigError::InvalidMaxRunCount`] if the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            tracing::debug!(path = %path.display(), "loading runner config file");
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        config.validate()?;

        tracing::info!(
            strategy = ?config.strategy,
            max_run_count = config.max_run_count,
            cool_off_unit = %humantime::format_duration(config.cool_off_unit),
            "runner config loaded"
        );
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::InvalidMaxRunCount`] when `max_run_count` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_run_count == 0 {
            return Err(ConfigError::InvalidMaxRunCount);
        }
        Ok(())
    }
}

/// (De)serializes a `Duration` as a humantime string such as `"1m 30s"`.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}
