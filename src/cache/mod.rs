//! Compressed HTTP response cache
//!
//! Responses are stored as versioned LZ4 blobs (see [`codec`]) in one of two
//! backends:
//! - [`EphemeralCache`]: a hash keyed by URL plus a fetch-time sorted set, in
//!   any [`KvStore`](crate::store::KvStore)
//! - [`PgCache`]: the `http_cache_items` table, with an audit row per upsert
//!
//! The backends never synchronize with each other. Copying between two
//! ephemeral stores is an explicit [`EphemeralCache::migrate_to`].
//!
//! # Example
//!
//! ```rust,ignore
//! use recrawl::cache::{EphemeralCache, ResponseCache};
//!
//! let cache = ResponseCache::new(Arc::new(EphemeralCache::new(store)));
//! cache.put("https://example.com/", 200, headers, body, Utc::now()).await?;
//! let hit = cache.get("https://example.com/").await?;
//! ```

pub mod codec;
mod ephemeral;
mod postgres;

pub use self::ephemeral::{EphemeralCache, MigrateCount};
pub use self::postgres::{CachedResponsePatch, PgCache};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::UrlRecord;
use crate::queue::DurableQueue;

/// A fetched HTTP response as callers see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    /// Opaque serialized header blob
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        headers: impl Into<Vec<u8>>,
        body: impl Into<Vec<u8>>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            headers: headers.into(),
            body: body.into(),
            fetched_at,
        }
    }
}

/// Result of a bulk read
#[derive(Debug, Default)]
pub struct CacheScan {
    /// Entries that decoded successfully
    pub entries: Vec<CachedResponse>,
    /// Entries skipped because they failed to decode
    pub corrupt: usize,
}

/// A store that can hold compressed responses
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Insert or overwrite the entry for `response.url`
    async fn put(&self, response: &CachedResponse) -> Result<()>;

    /// Entry for `url`; a blob that fails to decode is an error
    async fn get(&self, url: &str) -> Result<Option<CachedResponse>>;

    /// Every entry, or only `filter_url`'s; undecodable entries are skipped
    async fn get_all(&self, filter_url: Option<&str>) -> Result<CacheScan>;

    /// URLs of readable entries, at most `limit` of them
    async fn urls(&self, limit: Option<usize>) -> Result<Vec<String>>;

    /// Number of cached entries
    async fn len(&self) -> Result<usize>;
}

/// Metrics-recording front end over a [`CacheBackend`]
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Compress and store a fetched response
    pub async fn put(
        &self,
        url: &str,
        status: u16,
        headers: impl Into<Vec<u8>>,
        body: impl Into<Vec<u8>>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let response = CachedResponse::new(url, status, headers, body, fetched_at);
        self.backend.put(&response).await
    }

    /// Store an already-built response
    pub async fn put_response(&self, response: &CachedResponse) -> Result<()> {
        self.backend.put(response).await
    }

    /// Look up `url`
    pub async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        match self.backend.get(url).await {
            Ok(found) => {
                metrics::record_cache_lookup(self.backend.name(), found.is_some());
                Ok(found)
            }
            Err(e @ Error::Decode(_)) => {
                metrics::record_decode_failures(self.backend.name(), 1);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Every readable entry, or only `filter_url`'s
    pub async fn get_all(&self, filter_url: Option<&str>) -> Result<Vec<CachedResponse>> {
        let scan = self.backend.get_all(filter_url).await?;
        if scan.corrupt > 0 {
            metrics::record_decode_failures(self.backend.name(), scan.corrupt);
            tracing::warn!(
                backend = self.backend.name(),
                corrupt = scan.corrupt,
                readable = scan.entries.len(),
                "Skipped corrupt cache entries"
            );
        }
        Ok(scan.entries)
    }

    /// Push `{"url": ..}` for every cached URL (at most `limit`) to the tail of `key`
    pub async fn seed_queue(
        &self,
        queue: &DurableQueue,
        key: &str,
        limit: Option<usize>,
    ) -> Result<usize> {
        let records: Vec<UrlRecord> = self
            .backend
            .urls(limit)
            .await?
            .into_iter()
            .map(UrlRecord::new)
            .collect();

        let pushed = queue.push_many(key, &records, false).await?;
        tracing::info!(
            backend = self.backend.name(),
            key = %key,
            pushed,
            "Seeded queue from cache"
        );
        Ok(pushed)
    }

    /// Number of cached entries
    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }
}
