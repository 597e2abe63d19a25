//! Worker-side item processing contract

use std::future::Future;

use async_trait::async_trait;

use crate::error::Result;
use crate::queue::QueueItem;

/// Handles one dequeued item
///
/// The coordinator never retries: an `Err` is logged and counted, and the
/// item is gone.
#[async_trait]
pub trait ItemProcessor: Send + Sync + 'static {
    async fn process(&self, item: QueueItem) -> Result<()>;
}

#[async_trait]
impl<F, Fut> ItemProcessor for F
where
    F: Fn(QueueItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn process(&self, item: QueueItem) -> Result<()> {
        (self)(item).await
    }
}
