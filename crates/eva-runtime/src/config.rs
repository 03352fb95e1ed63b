//! Runtime configuration.
//!
//! Everything here has a working default; an empty config file yields the
//! standard profile, an in-memory corpus and inline mode with the 500ms
//! session deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How validation requests are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Each request is validated synchronously under the inline deadline
    Inline,
    /// Requests are validated in bounded concurrent batches
    Batch,
}

/// Retry policy for the audit write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,

    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Corpus location; `None` keeps everything in memory
    pub store_path: Option<PathBuf>,

    /// Threshold profile preset active at startup
    pub profile: String,

    pub mode: ValidationMode,

    /// Per-session deadline in inline mode
    #[serde(with = "duration_ms")]
    pub inline_timeout: Duration,

    /// Largest accepted batch
    pub batch_max_size: usize,

    /// Sessions validated concurrently
    pub max_concurrent_sessions: usize,

    /// How long a critical notice may sit unacknowledged before it moves
    /// to the next recipient
    #[serde(with = "duration_ms")]
    pub ack_window: Duration,

    pub audit_retry: RetrySettings,

    /// Retry policy for notice delivery to a single recipient
    pub notify_retry: RetrySettings,

    /// How many recent cases feed the feedback window
    pub feedback_window_cases: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            profile: "standard".to_string(),
            mode: ValidationMode::Inline,
            inline_timeout: Duration::from_millis(500),
            batch_max_size: 64,
            max_concurrent_sessions: 32,
            ack_window: Duration::from_secs(60),
            audit_retry: RetrySettings::default(),
            notify_retry: RetrySettings::default(),
            feedback_window_cases: 50,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inline_timeout.is_zero() {
            return Err(ConfigError::Invalid("inline_timeout must be positive".into()));
        }
        if self.batch_max_size == 0 {
            return Err(ConfigError::Invalid("batch_max_size must be positive".into()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_sessions must be positive".into(),
            ));
        }
        if self.audit_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "audit_retry.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Serialize durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
