//! Coordinator configuration

use std::time::Duration;

use crate::config::{Config, CoordinatorSettings};

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_QUEUE_LEN: usize = 2000;

/// Configuration for a work queue coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Durable queue key to drain
    pub queue_key: String,

    /// Number of concurrent workers
    pub workers: usize,

    /// Delay after each received item
    pub poll_delay: Duration,

    /// Delay after an empty poll
    pub idle_delay: Duration,

    /// Local queue depth sampling interval
    pub monitor_interval: Duration,

    /// Local queue depth above which the coordinator overflows
    pub max_queue_len: usize,
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder(queue_key: impl Into<String>) -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new(queue_key)
    }

    /// Build from application settings, draining `queue_key`
    pub fn from_settings(
        queue_key: impl Into<String>,
        settings: &CoordinatorSettings,
    ) -> Result<Self, ConfigError> {
        Self::builder(queue_key)
            .workers(settings.workers)
            .poll_delay(settings.poll_delay())
            .idle_delay(settings.idle_delay())
            .monitor_interval(settings.monitor_interval())
            .max_queue_len(settings.max_queue_len)
            .build()
    }

    /// Drain the configured items key
    pub fn for_items(config: &Config) -> Result<Self, ConfigError> {
        Self::from_settings(config.keys.items.clone(), &config.coordinator)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "queue_key".to_string(),
            });
        }

        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                reason: "Must run at least 1 worker".to_string(),
            });
        }

        if self.max_queue_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_queue_len".to_string(),
                reason: "Must allow at least 1 queued item".to_string(),
            });
        }

        if self.idle_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "idle_delay".to_string(),
                reason: "Empty polls must back off".to_string(),
            });
        }

        if self.monitor_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "monitor_interval".to_string(),
                reason: "Must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug)]
pub struct CoordinatorConfigBuilder {
    queue_key: String,
    workers: Option<usize>,
    poll_delay: Option<Duration>,
    idle_delay: Option<Duration>,
    monitor_interval: Option<Duration>,
    max_queue_len: Option<usize>,
}

impl CoordinatorConfigBuilder {
    fn new(queue_key: impl Into<String>) -> Self {
        Self {
            queue_key: queue_key.into(),
            workers: None,
            poll_delay: None,
            idle_delay: None,
            monitor_interval: None,
            max_queue_len: None,
        }
    }

    /// Set worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set delay after each received item
    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    /// Set delay after an empty poll
    pub fn idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = Some(delay);
        self
    }

    /// Set monitor sampling interval
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    /// Set overflow threshold
    pub fn max_queue_len(mut self, max: usize) -> Self {
        self.max_queue_len = Some(max);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let config = CoordinatorConfig {
            queue_key: self.queue_key,
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            poll_delay: self.poll_delay.unwrap_or(DEFAULT_POLL_DELAY),
            idle_delay: self.idle_delay.unwrap_or(DEFAULT_IDLE_DELAY),
            monitor_interval: self.monitor_interval.unwrap_or(DEFAULT_MONITOR_INTERVAL),
            max_queue_len: self.max_queue_len.unwrap_or(DEFAULT_MAX_QUEUE_LEN),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        crate::error::Error::config(err.to_string())
    }
}
