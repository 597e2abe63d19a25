//! Work queue coordinator
//!
//! Drains a durable queue into a local queue and fans items out to a fixed
//! pool of workers. A monitor samples the local depth; if it ever exceeds the
//! configured threshold the coordinator stops pulling, pushes every undelivered
//! item back to the head of the durable queue, and ends with
//! [`Error::Overflow`]. Overflow is fatal: the process exits and its
//! replacement picks the requeued items up again.
//!
//! # Example
//!
//! ```rust,ignore
//! use recrawl::coordinator::{CoordinatorConfig, WorkQueueCoordinator};
//!
//! let config = CoordinatorConfig::builder("rspider:items").workers(4).build()?;
//! let coordinator = WorkQueueCoordinator::new(config, queue, Handle::current());
//! let handle = coordinator.start(|item: QueueItem| async move {
//!     persist(item).await
//! })?;
//!
//! tokio::signal::ctrl_c().await?;
//! let report = handle.stop().await?;
//! ```

pub mod config;
mod processor;
mod runner;
mod state;

pub use config::{ConfigError, CoordinatorConfig, CoordinatorConfigBuilder};
pub use processor::ItemProcessor;
pub use state::{CoordinatorState, CoordinatorStats, StatsSnapshot};

use std::sync::Arc;

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use self::runner::{drain, requeue, LocalReceiver, Monitor, Producer, Worker};
use self::state::StateCell;
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::DurableQueue;

/// Dispatcher from a durable queue to a worker pool
pub struct WorkQueueCoordinator {
    config: CoordinatorConfig,
    queue: DurableQueue,
    runtime: Handle,
    state: Arc<StateCell>,
}

impl WorkQueueCoordinator {
    /// Create an idle coordinator that will spawn its tasks on `runtime`
    pub fn new(config: CoordinatorConfig, queue: DurableQueue, runtime: Handle) -> Self {
        Self {
            config,
            queue,
            runtime,
            state: Arc::new(StateCell::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.get()
    }

    /// Spawn the producer, workers and monitor
    ///
    /// A coordinator runs once; starting it again is an error.
    pub fn start<P: ItemProcessor>(&self, processor: P) -> Result<CoordinatorHandle> {
        if !self
            .state
            .transition(CoordinatorState::Idle, CoordinatorState::Running)
        {
            return Err(Error::invalid_argument(format!(
                "coordinator for '{}' is {}, not idle",
                self.config.queue_key,
                self.state.get()
            )));
        }

        let key = self.config.queue_key.clone();
        let stats = Arc::new(CoordinatorStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let local_rx: LocalReceiver = Arc::new(Mutex::new(local_rx));
        let processor = Arc::new(processor);

        tracing::info!(
            key = %key,
            workers = self.config.workers,
            threshold = self.config.max_queue_len,
            "Starting work queue coordinator"
        );

        let producer = self.runtime.spawn(
            Producer {
                queue: self.queue.clone(),
                key: key.clone(),
                poll_delay: self.config.poll_delay,
                idle_delay: self.config.idle_delay,
                stats: Arc::clone(&stats),
                local_tx,
                shutdown: shutdown_rx.clone(),
            }
            .run(),
        );

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                self.runtime.spawn(
                    Worker {
                        id,
                        key: key.clone(),
                        processor: Arc::clone(&processor),
                        stats: Arc::clone(&stats),
                        local_rx: Arc::clone(&local_rx),
                        shutdown: shutdown_rx.clone(),
                    }
                    .run(),
                )
            })
            .collect();

        let monitor = self.runtime.spawn(
            Monitor {
                key: key.clone(),
                interval: self.config.monitor_interval,
                threshold: self.config.max_queue_len,
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx,
            }
            .run(),
        );

        let supervisor = self.runtime.spawn(supervise(Supervision {
            key,
            threshold: self.config.max_queue_len,
            queue: self.queue.clone(),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&stats),
            shutdown: Arc::clone(&shutdown_tx),
            local_rx,
            producer,
            workers,
            monitor,
        }));

        Ok(CoordinatorHandle {
            state: Arc::clone(&self.state),
            stats,
            shutdown: shutdown_tx,
            supervisor,
        })
    }
}

// ============================================================================
// Supervision
// ============================================================================

struct Supervision {
    key: String,
    threshold: usize,
    queue: DurableQueue,
    state: Arc<StateCell>,
    stats: Arc<CoordinatorStats>,
    shutdown: Arc<watch::Sender<bool>>,
    local_rx: LocalReceiver,
    producer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    monitor: JoinHandle<Option<usize>>,
}

/// Wait for overflow or stop, then wind everything down in order
async fn supervise(s: Supervision) -> Result<StatsSnapshot> {
    let overflow = match s.monitor.await {
        Ok(overflow) => overflow,
        Err(e) => {
            tracing::error!(key = %s.key, error = %e, "Monitor task failed");
            None
        }
    };

    if overflow.is_some() {
        s.state.set(CoordinatorState::Degraded);
        metrics::record_overflow(&s.key);
    }
    s.shutdown.send_replace(true);

    // Nothing enters the local queue once the producer has exited
    if let Err(e) = s.producer.await {
        tracing::error!(key = %s.key, error = %e, "Producer task failed");
    }

    let drained = drain(&s.local_rx, &s.stats).await;
    let drained_count = drained.len();
    let (requeued, lost) = requeue(&s.queue, &s.key, drained).await;
    s.stats.record_requeue(requeued, lost);

    // In-flight callbacks finish; none is aborted
    for result in join_all(s.workers).await {
        if let Err(e) = result {
            tracing::error!(key = %s.key, error = %e, "Worker task failed");
        }
    }

    let snapshot = s.stats.snapshot();
    metrics::set_local_depth(&s.key, snapshot.local_depth);

    let outcome = match overflow {
        Some(depth) => {
            tracing::error!(
                key = %s.key,
                depth,
                threshold = s.threshold,
                requeued,
                lost,
                "Local queue overflow, coordinator stopped"
            );
            Err(Error::Overflow {
                key: s.key.clone(),
                depth,
                threshold: s.threshold,
                requeued,
                lost,
            })
        }
        None => {
            tracing::info!(
                key = %s.key,
                popped = snapshot.popped,
                processed = snapshot.processed,
                failed = snapshot.failed,
                requeued = drained_count,
                "Work queue coordinator stopped"
            );
            Ok(snapshot)
        }
    };

    s.state.set(CoordinatorState::Stopped);
    outcome
}

// ============================================================================
// Coordinator Handle
// ============================================================================

/// Handle to a running coordinator
pub struct CoordinatorHandle {
    state: Arc<StateCell>,
    stats: Arc<CoordinatorStats>,
    shutdown: Arc<watch::Sender<bool>>,
    supervisor: JoinHandle<Result<StatsSnapshot>>,
}

impl CoordinatorHandle {
    pub fn state(&self) -> CoordinatorState {
        self.state.get()
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, readable after the handle is consumed
    pub fn stats_handle(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    /// A detached trigger for [`stop`](Self::stop), e.g. for a signal listener
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal(Arc::clone(&self.shutdown))
    }

    /// Whether the coordinator is still winding up or down
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }

    /// Wait until the coordinator ends, on overflow or after a [`StopSignal`]
    pub async fn wait(self) -> Result<StatsSnapshot> {
        match self.supervisor.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Unavailable(format!("coordinator supervisor failed: {e}"))),
        }
    }

    /// Request cooperative shutdown and wait for the final report
    pub async fn stop(self) -> Result<StatsSnapshot> {
        self.shutdown.send_replace(true);
        self.wait().await
    }
}

/// Requests cooperative shutdown of a coordinator without owning its handle
#[derive(Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueItem, Take};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config(key: &str) -> CoordinatorConfig {
        CoordinatorConfig::builder(key)
            .workers(2)
            .poll_delay(Duration::from_millis(1))
            .idle_delay(Duration::from_millis(1))
            .monitor_interval(Duration::from_millis(20))
            .max_queue_len(1000)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_processes_all_items_then_stops() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()));
        for n in 0..20 {
            queue.push("q", &json!({ "n": n }), false).await.unwrap();
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let coordinator = WorkQueueCoordinator::new(fast_config("q"), queue.clone(), Handle::current());
        let handle = coordinator
            .start(move |_item: QueueItem| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            })
            .unwrap();
        assert_eq!(handle.state(), CoordinatorState::Running);

        for _ in 0..200 {
            if seen.load(Ordering::SeqCst) == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let report = handle.stop().await.unwrap();
        assert_eq!(report.popped, 20);
        assert_eq!(report.processed, 20);
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert_eq!(queue.length("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processor_errors_are_counted_not_retried() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()));
        for n in 0..4 {
            queue.push("q", &json!({ "n": n }), false).await.unwrap();
        }

        let coordinator = WorkQueueCoordinator::new(fast_config("q"), queue.clone(), Handle::current());
        let handle = coordinator
            .start(|item: QueueItem| async move {
                if item["n"].as_i64().unwrap_or_default() % 2 == 0 {
                    Ok(())
                } else {
                    Err(Error::invalid_argument("odd"))
                }
            })
            .unwrap();

        for _ in 0..200 {
            let stats = handle.stats();
            if stats.processed + stats.failed == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.stop_signal().stop();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 2);
        assert!(queue.pop_batch("q", Take::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()));
        let coordinator = WorkQueueCoordinator::new(fast_config("q"), queue, Handle::current());

        let handle = coordinator
            .start(|_item: QueueItem| async { Ok::<(), Error>(()) })
            .unwrap();
        let second = coordinator.start(|_item: QueueItem| async { Ok::<(), Error>(()) });
        assert!(matches!(second, Err(Error::InvalidArgument(_))));

        handle.stop().await.unwrap();
    }
}
