//! Per-collection freshness tracking
//!
//! Each collection (events, groups, ...) owns a sorted set mapping URL to the
//! last modification time a sitemap or crawl confirmed for it, scored in whole
//! epoch seconds. The tracker turns that index into the next crawl set.
//!
//! Writes are last-write-wins per URL: recording an older time over a newer one
//! moves the URL back in the ordering.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SitemapRecord;
use crate::queue::{DurableQueue, MAX_BATCH_SIZE};
use crate::store::{KvStore, ScoredMember};
use crate::utils::to_epoch_secs;

/// Default freshness index key format
pub const DEFAULT_KEY_FORMAT: &str = "sitemap-{collection}";

/// A URL with its last known modification time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub url: String,
    pub last_modified: DateTime<Utc>,
}

impl From<FreshnessRecord> for SitemapRecord {
    fn from(record: FreshnessRecord) -> Self {
        SitemapRecord::new(record.url, record.last_modified)
    }
}

impl From<SitemapRecord> for FreshnessRecord {
    fn from(record: SitemapRecord) -> Self {
        Self {
            url: record.url,
            last_modified: record.lastmod,
        }
    }
}

/// Ordering of [`FreshnessTracker::top_n`] results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Most recently modified first
    #[default]
    NewestFirst,
    /// Least recently modified first
    OldestFirst,
}

/// Sorted-set backed freshness index, one key per collection
#[derive(Clone)]
pub struct FreshnessTracker {
    store: Arc<dyn KvStore>,
    key_format: String,
}

impl FreshnessTracker {
    /// Create a tracker using [`DEFAULT_KEY_FORMAT`]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_key_format(store, DEFAULT_KEY_FORMAT)
    }

    /// Create a tracker with a custom key format containing `{collection}`
    pub fn with_key_format(store: Arc<dyn KvStore>, key_format: impl Into<String>) -> Self {
        Self {
            store,
            key_format: key_format.into(),
        }
    }

    /// Store key holding `collection`'s index
    pub fn key(&self, collection: &str) -> String {
        self.key_format.replace("{collection}", collection)
    }

    /// Upsert the record for `url`
    pub async fn record_modification(
        &self,
        collection: &str,
        url: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = self.key(collection);
        self.store
            .zadd(&key, &[(url.to_string(), to_epoch_secs(modified_at))])
            .await?;
        Ok(())
    }

    /// Up to `n` records in the requested order; `None` returns the whole index
    ///
    /// Fails with [`Error::NotFound`] when the collection has no index.
    pub async fn top_n(
        &self,
        collection: &str,
        n: Option<usize>,
        order: Order,
    ) -> Result<Vec<FreshnessRecord>> {
        let key = self.key(collection);
        if !self.store.exists(&key).await? {
            return Err(Error::NotFound(format!(
                "freshness index `{key}` does not exist"
            )));
        }

        let stop = match n {
            Some(0) => return Ok(Vec::new()),
            Some(n) => isize::try_from(n).unwrap_or(isize::MAX) - 1,
            None => -1,
        };

        tracing::debug!(key = %key, n = ?n, order = ?order, "Fetching freshness records");

        let members = self
            .store
            .zrange_withscores(&key, 0, stop, order == Order::NewestFirst)
            .await?;
        Ok(to_records(&key, members))
    }

    /// Records modified within `[since, until]`, oldest first
    pub async fn modified_between(
        &self,
        collection: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FreshnessRecord>> {
        let key = self.key(collection);
        let members = self
            .store
            .zrangebyscore_withscores(&key, to_epoch_secs(since), to_epoch_secs(until))
            .await?;
        Ok(to_records(&key, members))
    }

    /// Last recorded modification time for `url`
    pub async fn last_modified(
        &self,
        collection: &str,
        url: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let key = self.key(collection);
        Ok(self
            .store
            .zscore(&key, url)
            .await?
            .and_then(|score| Utc.timestamp_opt(score as i64, 0).single()))
    }

    /// Delete the whole index; returns whether it existed
    pub async fn reset(&self, collection: &str) -> Result<bool> {
        let key = self.key(collection);
        let existed = self.store.del(&key).await?;
        tracing::warn!(key = %key, existed, "Deleted freshness index");
        Ok(existed)
    }

    /// Number of tracked URLs
    pub async fn len(&self, collection: &str) -> Result<usize> {
        self.store.zcard(&self.key(collection)).await
    }

    /// Whether the collection has an index
    pub async fn exists(&self, collection: &str) -> Result<bool> {
        self.store.exists(&self.key(collection)).await
    }

    /// Bulk import sitemap records in chunks; `replace` resets the index first
    ///
    /// Returns the number of records written.
    pub async fn import(
        &self,
        collection: &str,
        records: &[SitemapRecord],
        replace: bool,
    ) -> Result<usize> {
        let key = self.key(collection);
        if replace {
            self.reset(collection).await?;
        }

        let batches = records.len().div_ceil(MAX_BATCH_SIZE);
        for (ix, batch) in records.chunks(MAX_BATCH_SIZE).enumerate() {
            let members: Vec<ScoredMember> = batch
                .iter()
                .map(|r| (r.url.clone(), to_epoch_secs(r.lastmod)))
                .collect();
            self.store.zadd(&key, &members).await?;

            tracing::info!(
                key = %key,
                batch = ix + 1,
                batches,
                pushed = batch.len(),
                "Imported sitemap batch"
            );
        }

        Ok(records.len())
    }

    /// Push the `n` freshest (or stalest) records into `queue` as seed items
    ///
    /// Items pop in `order` whether or not `priority` puts them at the head.
    /// Returns the number of items pushed.
    pub async fn schedule(
        &self,
        collection: &str,
        n: Option<usize>,
        order: Order,
        queue: &DurableQueue,
        queue_key: &str,
        priority: bool,
    ) -> Result<usize> {
        let records: Vec<SitemapRecord> = self
            .top_n(collection, n, order)
            .await?
            .into_iter()
            .map(SitemapRecord::from)
            .collect();

        if records.is_empty() {
            tracing::warn!(collection = %collection, "Freshness index is empty, nothing to schedule");
            return Ok(0);
        }

        let pushed = queue.push_many(queue_key, &records, priority).await?;
        tracing::info!(
            collection = %collection,
            queue = %queue_key,
            pushed,
            "Scheduled URLs for crawl"
        );
        Ok(pushed)
    }
}

/// Keep records whose URL was never fetched, or changed after its last fetch
pub fn filter_stale(
    records: Vec<SitemapRecord>,
    last_fetched: &HashMap<String, DateTime<Utc>>,
) -> Vec<SitemapRecord> {
    let before = records.len();
    let stale: Vec<SitemapRecord> = records
        .into_iter()
        .filter(|record| match last_fetched.get(&record.url) {
            None => true,
            Some(fetched_at) => record.lastmod > *fetched_at,
        })
        .collect();

    tracing::info!(before, after = stale.len(), "Filtered already-fresh URLs");
    stale
}

fn to_records(key: &str, members: Vec<ScoredMember>) -> Vec<FreshnessRecord> {
    members
        .into_iter()
        .filter_map(|(url, score)| match Utc.timestamp_opt(score as i64, 0).single() {
            Some(last_modified) => Some(FreshnessRecord { url, last_modified }),
            None => {
                tracing::warn!(key = %key, url = %url, score, "Skipping out-of-range score");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn tracker() -> FreshnessTracker {
        FreshnessTracker::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_key_format() {
        let t = tracker();
        assert_eq!(t.key("events"), "sitemap-events");

        let custom = FreshnessTracker::with_key_format(Arc::new(MemoryStore::new()), "fresh:{collection}:v2");
        assert_eq!(custom.key("groups"), "fresh:groups:v2");
    }

    #[tokio::test]
    async fn test_top_n_ordering() {
        let t = tracker();
        t.record_modification("events", "https://a/1", at(100)).await.unwrap();
        t.record_modification("events", "https://a/2", at(300)).await.unwrap();
        t.record_modification("events", "https://a/3", at(200)).await.unwrap();

        let newest = t.top_n("events", Some(2), Order::NewestFirst).await.unwrap();
        let urls: Vec<_> = newest.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/2", "https://a/3"]);

        let oldest = t.top_n("events", Some(1), Order::OldestFirst).await.unwrap();
        assert_eq!(oldest[0].url, "https://a/1");
        assert_eq!(oldest[0].last_modified, at(100));

        let all = t.top_n("events", None, Order::NewestFirst).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_top_n_missing_collection() {
        let t = tracker();
        let err = t.top_n("groups", Some(5), Order::NewestFirst).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let t = tracker();
        t.record_modification("events", "https://a/1", at(500)).await.unwrap();
        t.record_modification("events", "https://a/1", at(100)).await.unwrap();

        assert_eq!(t.len("events").await.unwrap(), 1);
        assert_eq!(t.last_modified("events", "https://a/1").await.unwrap(), Some(at(100)));
    }

    #[tokio::test]
    async fn test_record_same_time_is_idempotent() {
        let t = tracker();
        t.record_modification("events", "https://a/1", at(100)).await.unwrap();
        let before = t.top_n("events", None, Order::NewestFirst).await.unwrap();
        t.record_modification("events", "https://a/1", at(100)).await.unwrap();
        let after = t.top_n("events", None, Order::NewestFirst).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_reset() {
        let t = tracker();
        t.record_modification("events", "https://a/1", at(100)).await.unwrap();
        assert!(t.reset("events").await.unwrap());
        assert!(!t.exists("events").await.unwrap());
        assert!(!t.reset("events").await.unwrap());
    }

    #[tokio::test]
    async fn test_import_replace() {
        let t = tracker();
        t.record_modification("events", "https://old/", at(1)).await.unwrap();

        let records: Vec<_> = (0..MAX_BATCH_SIZE + 10)
            .map(|i| SitemapRecord::new(format!("https://a/{i}"), at(i as i64)))
            .collect();

        let written = t.import("events", &records, true).await.unwrap();
        assert_eq!(written, records.len());
        assert_eq!(t.len("events").await.unwrap(), records.len());
        assert_eq!(t.last_modified("events", "https://old/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_modified_between() {
        let t = tracker();
        for i in 1..=5 {
            t.record_modification("events", &format!("https://a/{i}"), at(i * 10)).await.unwrap();
        }
        let window = t.modified_between("events", at(20), at(40)).await.unwrap();
        assert_eq!(window.len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_pushes_seed_items() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let t = FreshnessTracker::new(store.clone());
        let queue = DurableQueue::new(store);

        t.record_modification("events", "https://a/1", at(100)).await.unwrap();
        t.record_modification("events", "https://a/2", at(200)).await.unwrap();

        let pushed = t
            .schedule("events", Some(10), Order::NewestFirst, &queue, "rspider:start_urls", false)
            .await
            .unwrap();
        assert_eq!(pushed, 2);

        let items = queue.peek("rspider:start_urls", 10).await.unwrap();
        assert_eq!(items[0]["url"], "https://a/2");
        assert!(items[0].contains_key("lastmod"));
    }

    #[test]
    fn test_filter_stale() {
        let records = vec![
            SitemapRecord::new("https://a/never", at(100)),
            SitemapRecord::new("https://a/changed", at(300)),
            SitemapRecord::new("https://a/fresh", at(100)),
            SitemapRecord::new("https://a/same", at(200)),
        ];
        let mut fetched = HashMap::new();
        fetched.insert("https://a/changed".to_string(), at(200));
        fetched.insert("https://a/fresh".to_string(), at(200));
        fetched.insert("https://a/same".to_string(), at(200));

        let stale = filter_stale(records, &fetched);
        let urls: Vec<_> = stale.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/never", "https://a/changed"]);
    }
}
