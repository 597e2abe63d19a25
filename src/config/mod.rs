//! Configuration management for recrawl
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Key names default to the ones the scrapy-side spiders already use,
//! so a fresh deployment interoperates with existing queues without extra settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Redis connection configuration
    pub redis: RedisConfig,

    /// PostgreSQL configuration (durable cache backend)
    pub database: DatabaseConfig,

    /// Queue, index and cache key names
    pub keys: KeyConfig,

    /// Work queue coordinator tuning
    pub coordinator: CoordinatorSettings,

    /// Response cache configuration
    pub cache: CacheSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL holding queues and freshness indexes
    pub url: String,

    /// Redis URL holding the ephemeral response cache (defaults to `url`)
    pub cache_url: Option<String>,

    /// Connection pool size
    pub pool_size: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Key names in the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Seed URL queue consumed by spiders
    pub start_urls: String,

    /// Scraped item queue drained by the coordinator
    pub items: String,

    /// Hash of compressed cached responses
    pub http_cache: String,

    /// Companion sorted set of fetch times
    pub http_date: String,

    /// Freshness index key; `{collection}` is substituted
    pub sitemap_format: String,

    /// Hash of URLs whose scrape result has been verified
    pub verify_scraped: String,
}

/// Coordinator settings as they appear in files and the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Number of workers
    pub workers: usize,

    /// Delay after each received item, in milliseconds
    pub poll_delay_ms: u64,

    /// Delay after an empty poll, in milliseconds
    pub idle_delay_ms: u64,

    /// Local queue depth sampling interval, in seconds
    pub monitor_interval_secs: u64,

    /// Local queue depth that triggers overflow
    pub max_queue_len: usize,
}

/// Compression codec for cached responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Lz4,
}

/// Response cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Block compressor used for new entries
    pub codec: Codec,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let url = std::env::var("RECRAWL_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .unwrap_or(defaults.redis.url);

        let cache_url = std::env::var("RECRAWL_REDIS_CACHE_URL").ok();

        let redis_pool_size = std::env::var("RECRAWL_REDIS_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.redis.pool_size);

        let postgres_url = std::env::var("RECRAWL_POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or(defaults.database.postgres_url);

        let db_pool_size = std::env::var("RECRAWL_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.database.pool_size);

        let keys = KeyConfig {
            start_urls: std::env::var("RECRAWL_START_URLS_KEY")
                .unwrap_or(defaults.keys.start_urls),
            items: std::env::var("RECRAWL_ITEMS_KEY").unwrap_or(defaults.keys.items),
            http_cache: std::env::var("RECRAWL_HTTP_CACHE_KEY")
                .unwrap_or(defaults.keys.http_cache),
            http_date: std::env::var("RECRAWL_HTTP_DATE_KEY").unwrap_or(defaults.keys.http_date),
            sitemap_format: std::env::var("RECRAWL_SITEMAP_KEY_FORMAT")
                .unwrap_or(defaults.keys.sitemap_format),
            verify_scraped: std::env::var("RECRAWL_VERIFY_SCRAPED_KEY")
                .unwrap_or(defaults.keys.verify_scraped),
        };

        let coordinator = CoordinatorSettings {
            workers: std::env::var("RECRAWL_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.coordinator.workers),
            poll_delay_ms: std::env::var("RECRAWL_POLL_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.coordinator.poll_delay_ms),
            idle_delay_ms: std::env::var("RECRAWL_IDLE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.coordinator.idle_delay_ms),
            monitor_interval_secs: std::env::var("RECRAWL_MONITOR_INTERVAL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.coordinator.monitor_interval_secs),
            max_queue_len: std::env::var("RECRAWL_MAX_QUEUE_LEN")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.coordinator.max_queue_len),
        };

        let log_level =
            std::env::var("RECRAWL_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("RECRAWL_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            redis: RedisConfig {
                url,
                cache_url,
                pool_size: redis_pool_size,
            },
            database: DatabaseConfig {
                postgres_url,
                pool_size: db_pool_size,
            },
            keys,
            coordinator,
            cache: CacheSettings::default(),
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.workers == 0 {
            anyhow::bail!("coordinator.workers must be greater than 0");
        }

        if self.coordinator.max_queue_len == 0 {
            anyhow::bail!("coordinator.max_queue_len must be greater than 0");
        }

        if self.coordinator.idle_delay_ms == 0 {
            anyhow::bail!("coordinator.idle_delay_ms must be greater than 0");
        }

        if self.redis.pool_size == 0 || self.database.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if !self.keys.sitemap_format.contains("{collection}") {
            anyhow::bail!("keys.sitemap_format must contain the {{collection}} placeholder");
        }

        Ok(())
    }

    /// URL of the Redis instance holding the ephemeral cache
    #[must_use]
    pub fn cache_redis_url(&self) -> &str {
        self.redis.cache_url.as_deref().unwrap_or(&self.redis.url)
    }
}

impl CoordinatorSettings {
    /// Get poll delay as Duration
    #[must_use]
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    /// Get idle delay as Duration
    #[must_use]
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    /// Get monitor interval as Duration
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379"),
            cache_url: None,
            pool_size: 10,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: String::from("postgresql://localhost/recrawl"),
            pool_size: 10,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            start_urls: String::from("rspider:start_urls"),
            items: String::from("rspider:items"),
            http_cache: String::from("rspider:http_cache"),
            http_date: String::from("rspider:http_cache:date"),
            sitemap_format: String::from("sitemap-{collection}"),
            verify_scraped: String::from("rspider:verify_scraped"),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_delay_ms: 100,
            idle_delay_ms: 10,
            monitor_interval_secs: 15,
            max_queue_len: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
