//! Common test utilities

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use recrawl::queue::{DurableQueue, QueueItem};
use recrawl::store::{KvStore, MemoryStore};

/// A fresh in-memory store and a queue over it
#[allow(dead_code)]
pub fn memory_queue() -> (Arc<MemoryStore>, DurableQueue) {
    let store = Arc::new(MemoryStore::new());
    let queue = DurableQueue::new(store.clone() as Arc<dyn KvStore>);
    (store, queue)
}

/// Queue item `{"n": n}`
#[allow(dead_code)]
pub fn numbered(n: i64) -> QueueItem {
    serde_json::json!({ "n": n })
        .as_object()
        .cloned()
        .unwrap()
}

/// Read back the `n` field of every item
#[allow(dead_code)]
pub fn numbers(items: &[QueueItem]) -> Vec<i64> {
    items.iter().map(|i| i["n"].as_i64().unwrap()).collect()
}

/// Whole-second timestamp
#[allow(dead_code)]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Distinct page URL
#[allow(dead_code)]
pub fn page(n: usize) -> String {
    format!("https://example.com/page/{n}")
}
