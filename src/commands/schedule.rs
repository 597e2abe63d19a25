use std::sync::Arc;

use anyhow::{Context, Result};

use recrawl::config::Config;
use recrawl::freshness::{FreshnessTracker, Order};
use recrawl::queue::DurableQueue;
use recrawl::store::{KvStore, RedisStore};

/// Parameters for the schedule command
pub struct ScheduleParams {
    pub collection: String,
    pub n: Option<usize>,
    pub oldest_first: bool,
    pub priority: bool,
    pub queue: Option<String>,
}

async fn connect(config: &Config) -> Result<Arc<dyn KvStore>> {
    let store = RedisStore::connect(&config.redis.url, config.redis.pool_size)
        .await
        .context("Failed to connect to Redis")?;
    Ok(Arc::new(store))
}

pub async fn schedule(config: &Config, params: ScheduleParams) -> Result<()> {
    let store = connect(config).await?;
    let tracker = FreshnessTracker::with_key_format(store.clone(), config.keys.sitemap_format.clone());
    let queue = DurableQueue::new(store);

    if !tracker.exists(&params.collection).await? {
        anyhow::bail!(
            "No freshness index for collection '{}' (key {})",
            params.collection,
            tracker.key(&params.collection)
        );
    }

    let order = if params.oldest_first {
        Order::OldestFirst
    } else {
        Order::NewestFirst
    };
    let queue_key = params
        .queue
        .unwrap_or_else(|| config.keys.start_urls.clone());

    let pushed = tracker
        .schedule(
            &params.collection,
            params.n,
            order,
            &queue,
            &queue_key,
            params.priority,
        )
        .await?;

    println!("Scheduled {pushed} URLs from '{}' into {queue_key}", params.collection);
    println!("  Queue length: {}", queue.length(&queue_key).await?);

    Ok(())
}

pub async fn reset(config: &Config, collection: &str) -> Result<()> {
    let store = connect(config).await?;
    let tracker = FreshnessTracker::with_key_format(store, config.keys.sitemap_format.clone());

    if tracker.reset(collection).await? {
        println!("Reset freshness index for '{collection}'");
    } else {
        println!("No freshness index for '{collection}', nothing to reset");
    }

    Ok(())
}
