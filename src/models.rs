//! Core data structures shared across modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Entities and audit events
// ============================================================================

/// Kinds of persisted entity that produce audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A cached HTTP response in the durable backend
    HttpCacheItem,
    /// A scraped item persisted downstream of the item queue
    ScrapeItem,
}

impl EntityKind {
    /// Stable name stored in the audit table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpCacheItem => "http_cache_item",
            Self::ScrapeItem => "scrape_item",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http_cache_item" => Ok(Self::HttpCacheItem),
            "scrape_item" => Ok(Self::ScrapeItem),
            other => Err(format!("Unknown entity kind: {other}")),
        }
    }
}

/// A persisted entity with a statically known partial-update type
pub trait Entity {
    /// Audit kind recorded for every write
    const KIND: EntityKind;

    /// Partial update applied on upsert
    type Patch;

    /// Natural key the store deduplicates on
    fn natural_key(&self) -> &str;

    /// Build the patch that rewrites every mutable field of `self`
    fn to_patch(&self) -> Self::Patch;
}

/// Immutable audit record written on every entity upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Row id of the updated entity
    pub entity_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl UpdateEvent {
    /// Record an update of an entity of kind `E` with row id `entity_id`, happening now
    pub fn for_entity<E: Entity>(entity_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: E::KIND,
            entity_id,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Seed records
// ============================================================================

/// A URL with the modification time a sitemap reported for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapRecord {
    pub url: String,
    pub lastmod: DateTime<Utc>,
}

impl SitemapRecord {
    pub fn new(url: impl Into<String>, lastmod: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            lastmod,
        }
    }
}

/// The minimal seed item spiders consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
}

impl UrlRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Page(String);

    impl Entity for Page {
        const KIND: EntityKind = EntityKind::ScrapeItem;
        type Patch = String;

        fn natural_key(&self) -> &str {
            &self.0
        }

        fn to_patch(&self) -> String {
            self.0.to_uppercase()
        }
    }

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in [EntityKind::HttpCacheItem, EntityKind::ScrapeItem] {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("article".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_update_event_for_entity() {
        let page = Page("https://example.com/a".to_string());
        let row_id = Uuid::new_v4();
        let event = UpdateEvent::for_entity::<Page>(row_id);

        assert_eq!(event.kind, EntityKind::ScrapeItem);
        assert_eq!(event.entity_id, row_id);
        assert_ne!(event.id, row_id);
        assert_eq!(page.natural_key(), "https://example.com/a");
        assert_eq!(page.to_patch(), "HTTPS://EXAMPLE.COM/A");
    }

    #[test]
    fn test_sitemap_record_serializes_rfc3339() {
        let lastmod = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = SitemapRecord::new("https://example.com/", lastmod);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["url"], "https://example.com/");
        assert_eq!(json["lastmod"], "2024-05-01T12:00:00Z");
    }
}
