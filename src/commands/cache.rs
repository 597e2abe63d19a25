use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use recrawl::cache::{CacheBackend, EphemeralCache, MigrateCount, PgCache, ResponseCache};
use recrawl::config::Config;
use recrawl::queue::DurableQueue;
use recrawl::store::RedisStore;

use crate::Backend;

async fn ephemeral(url: &str, config: &Config) -> Result<EphemeralCache> {
    let store = RedisStore::connect(url, config.redis.pool_size)
        .await
        .with_context(|| format!("Failed to connect to Redis at {url}"))?;
    Ok(EphemeralCache::with_keys(
        Arc::new(store),
        config.keys.http_cache.clone(),
        config.keys.http_date.clone(),
    ))
}

async fn durable(config: &Config) -> Result<PgCache> {
    PgCache::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")
}

pub async fn seed_from_cache(
    config: &Config,
    backend: Backend,
    key: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let store = RedisStore::connect(&config.redis.url, config.redis.pool_size)
        .await
        .context("Failed to connect to Redis")?;
    let queue = DurableQueue::new(Arc::new(store));
    let key = key.unwrap_or_else(|| config.keys.start_urls.clone());

    let backend: Arc<dyn CacheBackend> = match backend {
        Backend::Ephemeral => Arc::new(ephemeral(config.cache_redis_url(), config).await?),
        Backend::Durable => Arc::new(durable(config).await?),
    };
    let cache = ResponseCache::new(backend);

    let pushed = cache.seed_queue(&queue, &key, limit).await?;
    println!(
        "Seeded {pushed} URLs from the {} cache into {key}",
        cache.backend().name()
    );

    Ok(())
}

pub async fn migrate_cache(
    config: &Config,
    source: &str,
    dest: &str,
    n: Option<usize>,
    random: bool,
) -> Result<()> {
    let source_cache = ephemeral(source, config).await?;
    let dest_cache = ephemeral(dest, config).await?;

    let count = n.map_or(MigrateCount::All, MigrateCount::Exactly);
    let copied = source_cache.migrate_to(&dest_cache, count, random).await?;

    println!("Migrated {copied} cache entries");
    println!("  Destination size: {}", dest_cache.len().await?);

    Ok(())
}

pub async fn evict_cache(config: &Config, days: u32) -> Result<()> {
    let cache = ephemeral(config.cache_redis_url(), config).await?;
    let cutoff = Utc::now() - Duration::days(i64::from(days));

    let before = cache.len().await?;
    let removed = cache.evict_older_than(cutoff).await?;

    println!("Evicted {removed} of {before} cache entries fetched before {cutoff}");

    Ok(())
}

pub async fn init_db(config: &Config) -> Result<()> {
    let cache = durable(config).await?;
    cache.init_schema().await?;

    let entries = cache.len().await?;
    println!("PostgreSQL schema ready ({entries} cached responses)");

    Ok(())
}
