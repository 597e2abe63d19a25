//! recrawl - Incremental re-crawl infrastructure
//!
//! Shared plumbing for a fleet of crawlers: a durable work queue in Redis,
//! a local fan-out coordinator that drains it, per-collection freshness
//! tracking and a response cache with an ephemeral and a durable backend.
//!
//! # Architecture
//!
//! - [`store`] - Key-value primitives (Redis, in-memory)
//! - [`queue`] - Durable FIFO queue of JSON items
//! - [`coordinator`] - Producer / worker fan-out with overflow detection
//! - [`freshness`] - Per-collection URL last-modified index
//! - [`cache`] - Versioned, compressed HTTP response cache
//! - [`verify`] - Registry of URLs whose scrape was verified
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use recrawl::config::Config;
//! use recrawl::coordinator::{CoordinatorConfig, WorkQueueCoordinator};
//! use recrawl::queue::{DurableQueue, QueueItem};
//! use recrawl::store::RedisStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = RedisStore::connect(&config.redis.url, config.redis.pool_size).await?;
//!     let queue = DurableQueue::new(Arc::new(store));
//!
//!     let coordinator = WorkQueueCoordinator::new(
//!         CoordinatorConfig::for_items(&config)?,
//!         queue,
//!         tokio::runtime::Handle::current(),
//!     );
//!     let handle = coordinator.start(|item: QueueItem| async move {
//!         println!("{}", serde_json::Value::Object(item));
//!         Ok::<(), recrawl::error::Error>(())
//!     })?;
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod store;
pub mod utils;
pub mod verify;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheBackend, CachedResponse, EphemeralCache, PgCache, ResponseCache};
    pub use crate::config::Config;
    pub use crate::coordinator::{
        CoordinatorConfig, CoordinatorHandle, CoordinatorState, ItemProcessor,
        WorkQueueCoordinator,
    };
    pub use crate::error::{Error, ErrorCategory, RecrawlErrorTrait, Result};
    pub use crate::freshness::{FreshnessTracker, Order};
    pub use crate::queue::{DurableQueue, QueueItem, Take};
    pub use crate::store::{KvStore, MemoryStore, RedisStore};
    pub use crate::verify::VerifySet;
}

pub use models::{SitemapRecord, UpdateEvent, UrlRecord};
