//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! default_transport = "queue"
//! default_queue = "default"
//! default_priority = 5
//!
//! [retry]
//! max_retries = 3
//! delay_ms = 1000
//! multiplier = 2.0
//! max_delay_ms = 30000
//!
//! [worker]
//! batch_size = 10
//! max_concurrency = 10
//! poll_interval_ms = 1000
//! drain_timeout_ms = 30000
//!
//! [scheduler]
//! tick_interval_ms = 1000
//!
//! [executor]
//! handler_timeout_ms = 60000
//! ```
//!
//! Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::dispatcher::{DEFAULT_QUEUE, DispatcherConfig};
use crate::app::executor::ExecutorConfig;
use crate::app::worker_loop::WorkerConfig;
use crate::domain::Priority;
use crate::impls::{QUEUE_TRANSPORT, RetryConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub default_transport: String,
    pub default_queue: String,
    pub default_priority: u8,
    pub retry: RetryConfig,
    pub worker: WorkerSettings,
    pub scheduler: SchedulerSettings,
    pub executor: ExecutorSettings,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            default_transport: QUEUE_TRANSPORT.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            default_priority: Priority::NORMAL.value(),
            retry: RetryConfig::default(),
            worker: WorkerSettings::default(),
            scheduler: SchedulerSettings::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub time_limit_ms: Option<u64>,
    pub message_limit: Option<u64>,
    pub drain_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 10,
            poll_interval_ms: 1_000,
            time_limit_ms: None,
            message_limit: None,
            drain_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub handler_timeout_ms: Option<u64>,
}

impl CourierConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: CourierConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_transport.trim().is_empty() {
            return Err(ConfigError::Invalid("default_transport must not be empty".into()));
        }
        if self.default_queue.trim().is_empty() {
            return Err(ConfigError::Invalid("default_queue must not be empty".into()));
        }
        Priority::new(self.default_priority).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.retry.multiplier < 1.0 || !self.retry.multiplier.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a finite number >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.worker.batch_size == 0 {
            return Err(ConfigError::Invalid("worker.batch_size must be at least 1".into()));
        }
        if self.worker.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_concurrency must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        Ok(DispatcherConfig {
            default_transport: self.default_transport.clone(),
            default_queue: self.default_queue.clone(),
            default_priority: Priority::new(self.default_priority)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
        })
    }

    /// Worker configuration named `name`.
    pub fn worker_config(&self, name: impl Into<String>) -> WorkerConfig {
        let w = &self.worker;
        WorkerConfig {
            name: name.into(),
            batch_size: w.batch_size,
            max_concurrency: w.max_concurrency,
            poll_interval: Duration::from_millis(w.poll_interval_ms),
            time_limit: w.time_limit_ms.map(Duration::from_millis),
            message_limit: w.message_limit,
            drain_timeout: Duration::from_millis(w.drain_timeout_ms),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            handler_timeout: self.executor.handler_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }
}
