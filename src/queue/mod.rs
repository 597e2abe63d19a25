//! Durable queue adapter
//!
//! A shared Redis list used as a crash-resilient mailbox between spiders and
//! the item pipeline. Items are JSON objects. A `"null"` entry is a tombstone
//! left by an earlier malformed write and is swept before every read so it can
//! never block retrieval.
//!
//! # Example
//!
//! ```rust,ignore
//! use recrawl::queue::{DurableQueue, Take};
//!
//! let queue = DurableQueue::new(store);
//! queue.push("rspider:start_urls", &serde_json::json!({"url": "https://example.com/"}), false).await?;
//! let items = queue.pop_batch("rspider:start_urls", Take::Count(10)).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::KvStore;

/// Opaque JSON object carried through the queue
pub type QueueItem = serde_json::Map<String, Value>;

/// Tombstone value swept before every read
pub const TOMBSTONE: &str = "null";

/// Maximum number of items sent to the store in one command
pub const MAX_BATCH_SIZE: usize = 2000;

/// How many items to pop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Take {
    /// Everything currently in the list
    All,
    /// Up to this many items
    Count(usize),
}

/// Push/pop primitives over a shared list store
#[derive(Clone)]
pub struct DurableQueue {
    store: Arc<dyn KvStore>,
}

impl DurableQueue {
    /// Create a queue adapter over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Serialize `item` and push it; `priority` puts it at the head so it pops next
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        key: &str,
        item: &T,
        priority: bool,
    ) -> Result<()> {
        let encoded = encode(key, item)?;
        let values = [encoded];
        if priority {
            self.store.lpush(key, &values).await?;
        } else {
            self.store.rpush(key, &values).await?;
        }
        Ok(())
    }

    /// Push a batch of items in chunks of [`MAX_BATCH_SIZE`]; returns how many were pushed
    ///
    /// With `priority`, the batch goes ahead of everything already queued and
    /// still pops in slice order. LPUSH reverses its arguments, so chunks are
    /// sent last to first with each chunk reversed.
    pub async fn push_many<T: Serialize>(
        &self,
        key: &str,
        items: &[T],
        priority: bool,
    ) -> Result<usize> {
        let mut chunks: Vec<&[T]> = items.chunks(MAX_BATCH_SIZE).collect();
        if priority {
            chunks.reverse();
        }

        let mut pushed = 0;
        for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
            let mut encoded = chunk
                .iter()
                .map(|item| encode(key, item))
                .collect::<Result<Vec<_>>>()?;

            if priority {
                encoded.reverse();
                self.store.lpush(key, &encoded).await?;
            } else {
                self.store.rpush(key, &encoded).await?;
            }
            pushed += encoded.len();

            tracing::debug!(
                key = %key,
                chunk = chunk_idx,
                pushed,
                total = items.len(),
                "Pushed batch"
            );
        }
        Ok(pushed)
    }

    /// Remove and return up to `take` items from the head
    ///
    /// Tombstones are swept first. Entries that are not JSON objects are dropped
    /// with a warning.
    pub async fn pop_batch(&self, key: &str, take: Take) -> Result<Vec<QueueItem>> {
        if take == Take::Count(0) {
            return Ok(Vec::new());
        }

        self.store.lrem(key, 0, TOMBSTONE).await?;
        let count = match take {
            Take::Count(n) => n,
            Take::All => self.store.llen(key).await?,
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let raw = self.store.lpop(key, count).await?;
        Ok(decode_all(key, raw))
    }

    /// Read up to `n` items from the head without removing them
    pub async fn peek(&self, key: &str, n: usize) -> Result<Vec<QueueItem>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.store.lrem(key, 0, TOMBSTONE).await?;
        let stop = isize::try_from(n).unwrap_or(isize::MAX) - 1;
        let raw = self.store.lrange(key, 0, stop).await?;
        Ok(decode_all(key, raw))
    }

    /// Current list length, for observability and backpressure only
    pub async fn length(&self, key: &str) -> Result<usize> {
        self.store.llen(key).await
    }

    /// Delete the whole list; returns whether it existed
    pub async fn clear(&self, key: &str) -> Result<bool> {
        let existed = self.store.del(key).await?;
        if existed {
            tracing::info!(key = %key, "Cleared queue");
        }
        Ok(existed)
    }
}

/// Serialize an item, rejecting anything that is not a JSON object
///
/// Readers drop non-object entries, so accepting one here would lose it.
pub(crate) fn encode<T: Serialize + ?Sized>(key: &str, item: &T) -> Result<String> {
    let value = serde_json::to_value(item).map_err(|e| {
        tracing::error!(key = %key, error = %e, "Failed to serialize item");
        Error::serialization(key, e)
    })?;

    match value {
        Value::Object(map) => serde_json::to_string(&map).map_err(|e| {
            tracing::error!(key = %key, error = %e, "Failed to serialize item");
            Error::serialization(key, e)
        }),
        other => {
            let kind = json_kind(&other);
            tracing::error!(key = %key, kind, "Items must be JSON objects");
            Err(Error::serialization(
                key,
                format!("items must be JSON objects, got {kind}"),
            ))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_all(key: &str, raw: Vec<String>) -> Vec<QueueItem> {
    raw.into_iter()
        .filter_map(|entry| match serde_json::from_str::<Value>(&entry) {
            Ok(Value::Object(item)) => Some(item),
            Ok(Value::Null) => None,
            Ok(other) => {
                tracing::warn!(key = %key, value = %other, "Dropping non-object queue entry");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable queue entry");
                None
            }
        })
        .collect()
}
