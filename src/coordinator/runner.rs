//! Producer, worker and monitor loops
//!
//! ```text
//! ┌──────────────┐  pop 1   ┌──────────┐  unbounded mpsc  ┌───────────┐
//! │ DurableQueue │─────────▶│ Producer │─────────────────▶│ Workers×W │
//! └──────▲───────┘          └──────────┘                  └───────────┘
//!        │ requeue (head)          local_depth ▲
//!        │                                     │ sample
//!        └───────────── overflow ─────── ┌─────────┐
//!                                        │ Monitor │
//!                                        └─────────┘
//! ```
//!
//! Every loop watches the same shutdown channel. A durable pop is never
//! cancelled half-way: the producer checks for shutdown only between pops.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::processor::ItemProcessor;
use super::state::CoordinatorStats;
use crate::metrics;
use crate::queue::{DurableQueue, QueueItem, Take};
use crate::utils::retry::{retry_store, Backoff};

pub(crate) type LocalReceiver = Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>;

/// Resolves once shutdown has been requested (even before the call) or the
/// coordinator has been dropped
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// ============================================================================
// Producer
// ============================================================================

pub(crate) struct Producer {
    pub queue: DurableQueue,
    pub key: String,
    pub poll_delay: Duration,
    pub idle_delay: Duration,
    pub stats: Arc<CoordinatorStats>,
    pub local_tx: mpsc::UnboundedSender<QueueItem>,
    pub shutdown: watch::Receiver<bool>,
}

impl Producer {
    pub(crate) async fn run(mut self) {
        tracing::debug!(key = %self.key, "Producer starting");

        while !*self.shutdown.borrow() {
            let delay = match self.queue.pop_batch(&self.key, Take::Count(1)).await {
                Ok(items) if items.is_empty() => self.idle_delay,
                Ok(items) => {
                    for item in items {
                        self.forward(item).await;
                    }
                    self.poll_delay
                }
                Err(e) => {
                    tracing::debug!(key = %self.key, error = %e, "Poll failed, retrying next cycle");
                    self.poll_delay.max(self.idle_delay)
                }
            };

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = sleep(delay) => {}
            }
        }

        tracing::debug!(key = %self.key, "Producer shutting down");
    }

    async fn forward(&self, item: QueueItem) {
        self.stats.record_popped();
        metrics::record_popped(&self.key);

        if let Err(mpsc::error::SendError(item)) = self.local_tx.send(item) {
            // Local queue closed under us; hand the item back
            self.stats.record_dequeued();
            let (requeued, lost) = requeue(&self.queue, &self.key, vec![item]).await;
            self.stats.record_requeue(requeued, lost);
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

pub(crate) struct Worker<P: ItemProcessor> {
    pub id: usize,
    pub key: String,
    pub processor: Arc<P>,
    pub stats: Arc<CoordinatorStats>,
    pub local_rx: LocalReceiver,
    pub shutdown: watch::Receiver<bool>,
}

impl<P: ItemProcessor> Worker<P> {
    pub(crate) async fn run(self) {
        let Worker {
            id,
            key,
            processor,
            stats,
            local_rx,
            mut shutdown,
        } = self;

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => None,
                item = async { local_rx.lock().await.recv().await } => item,
            };

            let Some(item) = item else {
                break;
            };
            stats.record_dequeued();

            let outcome = AssertUnwindSafe(processor.process(item))
                .catch_unwind()
                .await;

            let success = match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(worker_id = id, key = %key, error = %e, "Item processing failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(worker_id = id, key = %key, "Item processor panicked");
                    false
                }
            };
            stats.record_outcome(success);
            metrics::record_processed(&key, success);
        }

        tracing::debug!(worker_id = id, "Worker shutting down");
    }
}

// ============================================================================
// Monitor
// ============================================================================

pub(crate) struct Monitor {
    pub key: String,
    pub interval: Duration,
    pub threshold: usize,
    pub stats: Arc<CoordinatorStats>,
    pub shutdown: watch::Receiver<bool>,
}

impl Monitor {
    /// Returns the observed depth if it exceeded the threshold, `None` on shutdown
    pub(crate) async fn run(mut self) -> Option<usize> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return None,
                _ = ticker.tick() => {
                    let depth = self.stats.depth();
                    metrics::set_local_depth(&self.key, depth);
                    tracing::debug!(key = %self.key, depth, "Local queue depth");

                    if depth > self.threshold {
                        return Some(depth);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Drain and requeue
// ============================================================================

/// Empty the local queue without waiting
pub(crate) async fn drain(local_rx: &LocalReceiver, stats: &CoordinatorStats) -> Vec<QueueItem> {
    let mut rx = local_rx.lock().await;
    let mut drained = Vec::new();
    while let Ok(item) = rx.try_recv() {
        stats.record_dequeued();
        drained.push(item);
    }
    drained
}

/// Push `items` back to the head of `key` in their original order
///
/// Returns `(requeued, lost)`.
pub(crate) async fn requeue(
    queue: &DurableQueue,
    key: &str,
    items: Vec<QueueItem>,
) -> (usize, usize) {
    let backoff = Backoff::for_requeue();
    let mut requeued = 0;
    let mut lost = 0;

    // Head insertion reverses order, so push the last item first
    for item in items.into_iter().rev() {
        let result = retry_store("requeue", &backoff, || queue.push(key, &item, true)).await;
        match result {
            Ok(()) => requeued += 1,
            Err(e) => {
                let item = serde_json::Value::Object(item);
                tracing::error!(key = %key, error = %e, item = %item, "Failed to requeue item");
                lost += 1;
            }
        }
    }

    metrics::record_requeued(key, requeued);
    (requeued, lost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn item(n: i64) -> QueueItem {
        json!({ "n": n }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_requeue_preserves_order_at_head() {
        let store = Arc::new(MemoryStore::new());
        let queue = DurableQueue::new(store);
        queue.push("q", &json!({"n": 99}), false).await.unwrap();

        let (requeued, lost) = requeue(&queue, "q", vec![item(1), item(2), item(3)]).await;
        assert_eq!((requeued, lost), (3, 0));

        let items = queue.pop_batch("q", Take::All).await.unwrap();
        let order: Vec<i64> = items.iter().map(|i| i["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 2, 3, 99]);
    }

    #[tokio::test]
    async fn test_requeue_retries_transient_failures() {
        let store = Arc::new(MemoryStore::new());
        let queue = DurableQueue::new(store.clone());
        store.inject_failures(2);

        let (requeued, lost) = requeue(&queue, "q", vec![item(1)]).await;
        assert_eq!((requeued, lost), (1, 0));
        assert_eq!(queue.length("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_updates_depth() {
        let stats = CoordinatorStats::default();
        let (tx, rx) = mpsc::unbounded_channel();
        for n in 0..3 {
            stats.record_popped();
            tx.send(item(n)).unwrap();
        }

        let rx: LocalReceiver = Arc::new(Mutex::new(rx));
        let drained = drain(&rx, &stats).await;
        assert_eq!(drained.len(), 3);
        assert_eq!(stats.depth(), 0);
    }
}
