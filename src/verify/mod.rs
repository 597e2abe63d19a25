//! Verified-scrape registry
//!
//! A hash keyed by URL recording which pages have had their scrape result
//! checked, with the JSON details of that check as the value. Spiders consult
//! it to skip pages that were already verified.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::queue::{encode, QueueItem};
use crate::store::KvStore;

/// Default registry key
const DEFAULT_KEY: &str = "rspider:verify_scraped";

/// Hash of verified URLs and their details
#[derive(Clone)]
pub struct VerifySet {
    store: Arc<dyn KvStore>,
    key: String,
}

impl VerifySet {
    /// Create a registry on the default key
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_key(store, DEFAULT_KEY)
    }

    /// Create a registry on a custom key
    pub fn with_key(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Store key of the registry
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether `url` has been verified
    pub async fn contains(&self, url: &str) -> Result<bool> {
        self.store.hexists(&self.key, url).await
    }

    /// Record `url` as verified with `details`, replacing earlier details
    ///
    /// `details` must serialize to a JSON object.
    pub async fn add<T: Serialize + ?Sized>(&self, url: &str, details: &T) -> Result<()> {
        let encoded = encode(&self.key, details)?;
        self.store.hset(&self.key, url, encoded.as_bytes()).await?;
        tracing::debug!(key = %self.key, url = %url, "Recorded verified scrape");
        Ok(())
    }

    /// Details recorded for `url`
    pub async fn get(&self, url: &str) -> Result<Option<QueueItem>> {
        let Some(raw) = self.store.hget(&self.key, url).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(details)) => Ok(Some(details)),
            Ok(_) => Err(Error::decode(format!(
                "verify entry for `{url}` is not a JSON object"
            ))),
            Err(e) => Err(Error::decode(format!(
                "verify entry for `{url}` is not valid JSON: {e}"
            ))),
        }
    }

    /// Forget `url`; returns whether it was recorded
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let removed = self.store.hdel(&self.key, &[url.to_string()]).await?;
        Ok(removed > 0)
    }

    /// Number of verified URLs
    pub async fn len(&self) -> Result<usize> {
        self.store.hlen(&self.key).await
    }

    /// Whether no URL has been verified
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, RecrawlErrorTrait};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn verify_set() -> (Arc<MemoryStore>, VerifySet) {
        let store = Arc::new(MemoryStore::new());
        let set = VerifySet::new(store.clone());
        (store, set)
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let (_, set) = verify_set();
        let url = "https://example.com/events/1";
        assert!(!set.contains(url).await.unwrap());
        assert!(set.get(url).await.unwrap().is_none());

        set.add(url, &json!({"status": 200, "items": 3})).await.unwrap();
        assert!(set.contains(url).await.unwrap());
        let details = set.get(url).await.unwrap().unwrap();
        assert_eq!(details["status"], 200);
        assert_eq!(details["items"], 3);

        assert!(set.remove(url).await.unwrap());
        assert!(!set.remove(url).await.unwrap());
        assert!(set.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_add_overwrites_details() {
        let (_, set) = verify_set();
        set.add("https://a/", &json!({"attempt": 1})).await.unwrap();
        set.add("https://a/", &json!({"attempt": 2})).await.unwrap();

        assert_eq!(set.len().await.unwrap(), 1);
        assert_eq!(set.get("https://a/").await.unwrap().unwrap()["attempt"], 2);
    }

    #[tokio::test]
    async fn test_non_object_details_rejected() {
        let (_, set) = verify_set();
        let err = set.add("https://a/", &json!(["ok"])).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Serialization);
        assert!(!set.contains("https://a/").await.unwrap());
    }

    #[tokio::test]
    async fn test_configured_key() {
        let store = Arc::new(MemoryStore::new());
        let config = crate::config::Config::default();
        let set = VerifySet::with_key(store.clone(), config.keys.verify_scraped.clone());

        set.add("https://a/", &json!({"ok": true})).await.unwrap();
        assert!(store.hexists(&config.keys.verify_scraped, "https://a/").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_decode_error() {
        let (store, set) = verify_set();
        store.hset(set.key(), "https://a/", b"{broken").await.unwrap();
        store.hset(set.key(), "https://b/", b"42").await.unwrap();

        assert!(matches!(set.get("https://a/").await, Err(Error::Decode(_))));
        assert!(matches!(set.get("https://b/").await, Err(Error::Decode(_))));
        assert!(set.contains("https://a/").await.unwrap());
    }
}
