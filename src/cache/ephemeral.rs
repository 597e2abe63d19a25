//! Cache backend over a key-value store
//!
//! ```text
//! <hash_key>  HASH  url -> versioned blob
//! <date_key>  ZSET  url -> fetched_at (epoch seconds, µs precision)
//! ```
//!
//! Both keys are written in one transaction per entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::codec::{self, Version};
use super::{CacheBackend, CacheScan, CachedResponse};
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::MAX_BATCH_SIZE;
use crate::store::KvStore;
use crate::utils::{format_bytes, from_epoch_f64, to_epoch_f64};

const DEFAULT_HASH_KEY: &str = "rspider:http_cache";
const DEFAULT_DATE_KEY: &str = "rspider:http_cache:date";

/// How many entries a migration copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateCount {
    /// Every key in the source
    All,
    /// Exactly this many; must be below the source's key count
    Exactly(usize),
}

/// Hash + sorted-set response cache
#[derive(Clone)]
pub struct EphemeralCache {
    store: Arc<dyn KvStore>,
    hash_key: String,
    date_key: String,
}

impl EphemeralCache {
    /// Cache under the default key names
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_keys(store, DEFAULT_HASH_KEY, DEFAULT_DATE_KEY)
    }

    pub fn with_keys(
        store: Arc<dyn KvStore>,
        hash_key: impl Into<String>,
        date_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            hash_key: hash_key.into(),
            date_key: date_key.into(),
        }
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    pub fn date_key(&self) -> &str {
        &self.date_key
    }

    async fn write_blob(&self, url: &str, blob: &[u8], fetched_at: f64) -> Result<()> {
        self.store
            .put_indexed(&self.hash_key, &self.date_key, url, blob, fetched_at)
            .await
    }

    // ========================================================================
    // Age queries
    // ========================================================================

    /// The `n` least recently fetched URLs with their fetch times
    pub async fn oldest(&self, n: usize) -> Result<Vec<(String, DateTime<Utc>)>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(n).unwrap_or(isize::MAX) - 1;
        let members = self
            .store
            .zrange_withscores(&self.date_key, 0, stop, false)
            .await?;
        Ok(to_times(members))
    }

    /// Fetch time of every indexed URL
    pub async fn fetched_at_index(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let members = self
            .store
            .zrange_withscores(&self.date_key, 0, -1, false)
            .await?;
        Ok(to_times(members).into_iter().collect())
    }

    /// Remove every entry fetched strictly before `cutoff`; returns how many were removed
    pub async fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_score = to_epoch_f64(cutoff);
        let stale: Vec<String> = self
            .store
            .zrangebyscore_withscores(&self.date_key, f64::MIN, cutoff_score)
            .await?
            .into_iter()
            .filter(|(_, score)| *score < cutoff_score)
            .map(|(url, _)| url)
            .collect();

        let mut removed = 0;
        for chunk in stale.chunks(MAX_BATCH_SIZE) {
            removed += self
                .store
                .remove_indexed(&self.hash_key, &self.date_key, chunk)
                .await?;
        }

        tracing::info!(
            key = %self.hash_key,
            cutoff = %cutoff,
            removed,
            "Evicted stale cache entries"
        );
        Ok(removed)
    }

    // ========================================================================
    // Migration
    // ========================================================================

    /// Copy entries into `dest`, verbatim, with their fetch-time index
    ///
    /// With `random`, a uniform sample of keys is taken; otherwise the first
    /// keys in hash order. Returns the number of entries copied.
    pub async fn migrate_to(
        &self,
        dest: &EphemeralCache,
        count: MigrateCount,
        random: bool,
    ) -> Result<usize> {
        let keys = self.store.hkeys(&self.hash_key).await?;
        let available = keys.len();

        let selected: Vec<String> = match count {
            MigrateCount::All => keys,
            MigrateCount::Exactly(n) if n >= available => {
                return Err(Error::invalid_argument(format!(
                    "cannot migrate {n} entries: source '{}' holds {available}",
                    self.hash_key
                )));
            }
            MigrateCount::Exactly(n) if random => {
                let mut rng = rand::thread_rng();
                let mut picked = rand::seq::index::sample(&mut rng, available, n).into_vec();
                picked.sort_unstable();
                picked.into_iter().map(|i| keys[i].clone()).collect()
            }
            MigrateCount::Exactly(n) => keys.into_iter().take(n).collect(),
        };

        tracing::info!(
            source = %self.hash_key,
            dest = %dest.hash_key,
            available,
            selected = selected.len(),
            random,
            "Starting cache migration"
        );

        let index: HashMap<String, f64> = self
            .store
            .zrange_withscores(&self.date_key, 0, -1, false)
            .await?
            .into_iter()
            .collect();

        let mut copied = 0;
        let mut copied_bytes = 0u64;
        for chunk in selected.chunks(MAX_BATCH_SIZE) {
            let blobs = self.store.hmget(&self.hash_key, chunk).await?;
            for (url, blob) in chunk.iter().zip(blobs) {
                let Some(blob) = blob else {
                    // Removed since the key listing
                    continue;
                };
                let score = match index.get(url) {
                    Some(score) => *score,
                    None => match codec::decode(&blob) {
                        Ok((response, _)) => to_epoch_f64(response.fetched_at),
                        Err(e) => {
                            tracing::warn!(url = %url, error = %e, "Skipping unindexed corrupt entry");
                            continue;
                        }
                    },
                };
                dest.write_blob(url, &blob, score).await?;
                copied += 1;
                copied_bytes += blob.len() as u64;
            }
            tracing::debug!(copied, total = selected.len(), "Migrated batch");
        }

        metrics::record_migrated(copied);
        tracing::info!(copied, size = %format_bytes(copied_bytes), "Cache migration complete");
        Ok(copied)
    }
}

fn to_times(members: Vec<(String, f64)>) -> Vec<(String, DateTime<Utc>)> {
    members
        .into_iter()
        .filter_map(|(url, score)| from_epoch_f64(score).map(|time| (url, time)))
        .collect()
}

#[async_trait]
impl CacheBackend for EphemeralCache {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    async fn put(&self, response: &CachedResponse) -> Result<()> {
        let blob = codec::encode(response);
        self.write_blob(&response.url, &blob, to_epoch_f64(response.fetched_at))
            .await
    }

    async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let Some(blob) = self.store.hget(&self.hash_key, url).await? else {
            return Ok(None);
        };

        let (response, version) = codec::decode(&blob).map_err(|e| {
            tracing::warn!(key = %self.hash_key, url = %url, error = %e, "Corrupt cache entry");
            e
        })?;

        if version != Version::CURRENT {
            self.put(&response).await?;
            tracing::debug!(url = %url, "Upgraded legacy cache entry");
        }
        Ok(Some(response))
    }

    async fn get_all(&self, filter_url: Option<&str>) -> Result<CacheScan> {
        let raw = match filter_url {
            Some(url) => self
                .store
                .hget(&self.hash_key, url)
                .await?
                .map(|blob| vec![(url.to_string(), blob)])
                .unwrap_or_default(),
            None => self.store.hgetall(&self.hash_key).await?,
        };

        let mut scan = CacheScan::default();
        for (url, blob) in raw {
            match codec::decode(&blob) {
                Ok((response, _)) => scan.entries.push(response),
                Err(e) => {
                    tracing::warn!(key = %self.hash_key, url = %url, error = %e, "Skipping corrupt cache entry");
                    scan.corrupt += 1;
                }
            }
        }
        Ok(scan)
    }

    /// URLs of entries that decode; corrupt entries are skipped like in `get_all`
    async fn urls(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let keys = self.store.hkeys(&self.hash_key).await?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut urls = Vec::new();
        let mut corrupt = 0usize;
        for chunk in keys.chunks(MAX_BATCH_SIZE) {
            if urls.len() >= limit {
                break;
            }
            let blobs = self.store.hmget(&self.hash_key, chunk).await?;
            for (url, blob) in chunk.iter().zip(blobs) {
                let Some(blob) = blob else {
                    continue;
                };
                if let Err(e) = codec::decode(&blob) {
                    tracing::warn!(key = %self.hash_key, url = %url, error = %e, "Not seeding corrupt cache entry");
                    corrupt += 1;
                    continue;
                }
                urls.push(url.clone());
                if urls.len() >= limit {
                    break;
                }
            }
        }

        if corrupt > 0 {
            tracing::warn!(key = %self.hash_key, corrupt, "Skipped corrupt cache entries");
        }
        Ok(urls)
    }

    async fn len(&self) -> Result<usize> {
        self.store.hlen(&self.hash_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn response(url: &str, secs: i64) -> CachedResponse {
        CachedResponse::new(url, 200, b"k: v".to_vec(), b"<html/>".to_vec(), at(secs))
    }

    fn cache() -> (Arc<MemoryStore>, EphemeralCache) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), EphemeralCache::new(store))
    }

    #[tokio::test]
    async fn test_put_writes_hash_and_index() {
        let (store, cache) = cache();
        cache.put(&response("https://a/", 1_000)).await.unwrap();

        assert_eq!(store.hlen(DEFAULT_HASH_KEY).await.unwrap(), 1);
        assert_eq!(
            store.zscore(DEFAULT_DATE_KEY, "https://a/").await.unwrap(),
            Some(1_000.0)
        );
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_entry() {
        let (_, cache) = cache();
        cache.put(&response("https://a/", 1_000)).await.unwrap();
        cache.put(&response("https://a/", 2_000)).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 1);
        let hit = cache.get("https://a/").await.unwrap().unwrap();
        assert_eq!(hit.fetched_at, at(2_000));
    }

    #[tokio::test]
    async fn test_legacy_entry_upgraded_on_get() {
        let (store, cache) = cache();
        let original = response("https://legacy/", 5_000);
        let blob = codec::encode_legacy(&original, true).unwrap();
        store.insert_raw(DEFAULT_HASH_KEY, "https://legacy/", blob);

        let hit = cache.get("https://legacy/").await.unwrap().unwrap();
        assert_eq!(hit, original);

        let stored = store.hget(DEFAULT_HASH_KEY, "https://legacy/").await.unwrap().unwrap();
        assert_eq!(stored[0], Version::Typed as u8);
        assert!(store.zscore(DEFAULT_DATE_KEY, "https://legacy/").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_legacy_without_time_is_recent() {
        let (store, cache) = cache();
        let blob = codec::encode_legacy(&response("https://old/", 0), false).unwrap();
        store.insert_raw(DEFAULT_HASH_KEY, "https://old/", blob);

        let hit = cache.get("https://old/").await.unwrap().unwrap();
        let age = Utc::now() - hit.fetched_at;
        assert!(age <= Duration::hours(24) + Duration::seconds(5));
        assert!(age >= Duration::hours(24) - Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_get_all_filter() {
        let (_, cache) = cache();
        cache.put(&response("https://a/", 1)).await.unwrap();
        cache.put(&response("https://b/", 2)).await.unwrap();

        let scan = cache.get_all(Some("https://b/")).await.unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].url, "https://b/");

        assert!(cache.get_all(Some("https://z/")).await.unwrap().entries.is_empty());
        assert_eq!(cache.get_all(None).await.unwrap().entries.len(), 2);
    }

    #[tokio::test]
    async fn test_oldest_and_index() {
        let (_, cache) = cache();
        cache.put(&response("https://new/", 3_000)).await.unwrap();
        cache.put(&response("https://old/", 1_000)).await.unwrap();
        cache.put(&response("https://mid/", 2_000)).await.unwrap();

        let oldest = cache.oldest(2).await.unwrap();
        assert_eq!(oldest[0], ("https://old/".to_string(), at(1_000)));
        assert_eq!(oldest[1].0, "https://mid/");
        assert!(cache.oldest(0).await.unwrap().is_empty());

        let index = cache.fetched_at_index().await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index["https://new/"], at(3_000));
    }

    #[tokio::test]
    async fn test_evict_older_than() {
        let (store, cache) = cache();
        cache.put(&response("https://a/", 1_000)).await.unwrap();
        cache.put(&response("https://b/", 2_000)).await.unwrap();
        cache.put(&response("https://c/", 3_000)).await.unwrap();

        assert_eq!(cache.evict_older_than(at(2_000)).await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 2);
        assert_eq!(store.zcard(DEFAULT_DATE_KEY).await.unwrap(), 2);
        assert!(cache.get("https://a/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrate_first_n() {
        let (_, source) = cache();
        let (_, dest) = cache();
        for i in 0..5 {
            source.put(&response(&format!("https://a/{i}"), i)).await.unwrap();
        }

        let copied = source.migrate_to(&dest, MigrateCount::Exactly(2), false).await.unwrap();
        assert_eq!(copied, 2);
        assert_eq!(dest.urls(None).await.unwrap(), vec!["https://a/0", "https://a/1"]);
        assert_eq!(dest.oldest(1).await.unwrap()[0].1, at(0));
    }

    #[tokio::test]
    async fn test_migrate_all() {
        let (_, source) = cache();
        let (_, dest) = cache();
        for i in 0..4 {
            source.put(&response(&format!("https://a/{i}"), i)).await.unwrap();
        }

        assert_eq!(source.migrate_to(&dest, MigrateCount::All, true).await.unwrap(), 4);
        assert_eq!(dest.len().await.unwrap(), 4);
        assert_eq!(source.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_migrate_rejects_n_not_below_available() {
        let (_, source) = cache();
        let (_, dest) = cache();
        for i in 0..3 {
            source.put(&response(&format!("https://a/{i}"), i)).await.unwrap();
        }

        let err = source
            .migrate_to(&dest, MigrateCount::Exactly(3), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(dest.len().await.unwrap(), 0);
    }
}
