//! Key-value store abstraction
//!
//! The queue, freshness and cache layers only ever talk to the store through
//! [`KvStore`]. Production code uses [`RedisStore`]; tests and dry runs use
//! [`MemoryStore`], which mirrors Redis semantics closely enough (including
//! `WRONGTYPE` errors and empty-key removal) that the same assertions hold
//! against both.
//!
//! ```text
//! ┌──────────────┐ ┌──────────────────┐ ┌───────────────┐
//! │ DurableQueue │ │ FreshnessTracker │ │ EphemeralCache│
//! └──────┬───────┘ └────────┬─────────┘ └──────┬────────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                      ┌─────────┐
//!                      │ KvStore │
//!                      └────┬────┘
//!                ┌──────────┴──────────┐
//!                ▼                     ▼
//!         ┌────────────┐        ┌─────────────┐
//!         │ RedisStore │        │ MemoryStore │
//!         └────────────┘        └─────────────┘
//! ```

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;

use crate::error::Result;

/// A sorted-set member with its score
pub type ScoredMember = (String, f64);

/// List, sorted-set and hash primitives over a shared store
///
/// Every method maps to a single store round trip. Implementations must not
/// add client-side locking beyond what is needed to make each call atomic.
#[async_trait]
pub trait KvStore: Send + Sync {
    // =========================================================================
    // Lists
    // =========================================================================

    /// Insert values at the head; returns the new length
    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize>;

    /// Append values at the tail; returns the new length
    async fn rpush(&self, key: &str, values: &[String]) -> Result<usize>;

    /// Remove and return up to `count` values from the head
    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>>;

    /// List length (0 for a missing key)
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Values between `start` and `stop` inclusive; negative indexes count from the tail
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Remove occurrences of `value`: all when `count == 0`, the first `count`
    /// from the head when positive, from the tail when negative
    async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize>;

    // =========================================================================
    // Keys
    // =========================================================================

    /// Whether the key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the key; returns whether it existed
    async fn del(&self, key: &str) -> Result<bool>;

    // =========================================================================
    // Sorted sets
    // =========================================================================

    /// Add or update members; returns the number of new members
    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize>;

    /// Members by rank with scores, ascending or (`rev`) descending
    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        rev: bool,
    ) -> Result<Vec<ScoredMember>>;

    /// Members with `min <= score <= max`, ascending
    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>>;

    /// Score of a member
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Remove members; returns the number removed
    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize>;

    /// Number of members
    async fn zcard(&self, key: &str) -> Result<usize>;

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Set a single field
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()>;

    /// Get a single field
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    /// Whether `field` is set
    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;

    /// Get several fields; the result is positionally aligned with `fields`
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// All field names
    async fn hkeys(&self, key: &str) -> Result<Vec<String>>;

    /// All fields with values
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Delete fields; returns the number removed
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize>;

    /// Number of fields
    async fn hlen(&self, key: &str) -> Result<usize>;

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Write `field` into `hash_key` and its score into `zset_key` atomically
    async fn put_indexed(
        &self,
        hash_key: &str,
        zset_key: &str,
        field: &str,
        value: &[u8],
        score: f64,
    ) -> Result<()>;

    /// Remove `fields` from both `hash_key` and `zset_key` atomically;
    /// returns the number of hash fields removed
    async fn remove_indexed(&self, hash_key: &str, zset_key: &str, fields: &[String])
        -> Result<usize>;
}
