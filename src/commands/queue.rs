use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use recrawl::config::Config;
use recrawl::coordinator::{CoordinatorConfig, WorkQueueCoordinator};
use recrawl::error::Error;
use recrawl::queue::{DurableQueue, QueueItem};
use recrawl::store::RedisStore;

async fn open_queue(config: &Config) -> Result<DurableQueue> {
    let store = RedisStore::connect(&config.redis.url, config.redis.pool_size)
        .await
        .context("Failed to connect to Redis")?;
    Ok(DurableQueue::new(Arc::new(store)))
}

fn write_line(item: QueueItem) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", Value::Object(item))
}

pub async fn dump(config: &Config, key: Option<String>, n: usize) -> Result<()> {
    let queue = open_queue(config).await?;
    let key = key.unwrap_or_else(|| config.keys.items.clone());

    let items = queue.peek(&key, n).await?;
    tracing::debug!(key = %key, shown = items.len(), "Dumping queue head");

    for item in items {
        write_line(item)?;
    }

    Ok(())
}

pub async fn drain(config: &Config, key: Option<String>, workers: Option<usize>) -> Result<()> {
    let queue = open_queue(config).await?;
    let key = key.unwrap_or_else(|| config.keys.items.clone());

    let mut settings = config.coordinator.clone();
    if let Some(workers) = workers {
        settings.workers = workers;
    }
    let coordinator_config = CoordinatorConfig::from_settings(key.clone(), &settings)?;

    let coordinator =
        WorkQueueCoordinator::new(coordinator_config, queue, tokio::runtime::Handle::current());
    let handle = coordinator.start(|item: QueueItem| async move {
        write_line(item).map_err(|e| Error::Unavailable(format!("stdout: {e}")))
    })?;

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping");
            stop.stop();
        }
    });

    match handle.wait().await {
        Ok(report) => {
            tracing::info!(
                key = %key,
                processed = report.processed,
                failed = report.failed,
                requeued = report.requeued,
                "Drain finished"
            );
            Ok(())
        }
        Err(e @ Error::Overflow { .. }) => {
            tracing::error!(key = %key, error = %e, "Local queue overflowed, exiting");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
