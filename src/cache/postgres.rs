//! Durable cache backend over PostgreSQL
//!
//! One row per URL in `http_cache_items`, body LZ4-compressed. Every upsert
//! also appends a `scrape_updates` audit row in the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{CacheBackend, CacheScan, CachedResponse};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, UpdateEvent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS http_cache_items (
    id UUID PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    status INTEGER NOT NULL,
    headers BYTEA,
    body BYTEA NOT NULL,
    fetched_at TIMESTAMPTZ NOT NULL,
    last_scraped TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_http_cache_items_fetched_at
    ON http_cache_items(fetched_at);

CREATE TABLE IF NOT EXISTS scrape_updates (
    id UUID PRIMARY KEY,
    scrape_type VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    scrape_base_id UUID NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scrape_updates_base
    ON scrape_updates(scrape_base_id);
"#;

const SELECT_ALL: &str = "SELECT url, status, headers, body, fetched_at FROM http_cache_items";
const SELECT_BY_URL: &str =
    "SELECT url, status, headers, body, fetched_at FROM http_cache_items WHERE url = $1";

/// Mutable columns of an `http_cache_items` row, as written on upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponsePatch {
    pub status: i32,
    /// `None` stores SQL NULL
    pub headers: Option<Vec<u8>>,
    /// Size-prefixed LZ4 block
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl Entity for CachedResponse {
    const KIND: EntityKind = EntityKind::HttpCacheItem;
    type Patch = CachedResponsePatch;

    fn natural_key(&self) -> &str {
        &self.url
    }

    fn to_patch(&self) -> CachedResponsePatch {
        CachedResponsePatch {
            status: i32::from(self.status),
            headers: (!self.headers.is_empty()).then(|| self.headers.clone()),
            body: lz4_flex::block::compress_prepend_size(&self.body),
            fetched_at: self.fetched_at,
        }
    }
}

/// `http_cache_items` backed response cache
#[derive(Clone)]
pub struct PgCache {
    pool: Pool,
}

impl PgCache {
    /// Connect and verify the database is reachable
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(url.to_string());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size));

        let pool = pool_config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        tracing::info!(pool_size, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Use an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the cache and audit tables if missing
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;

        tracing::info!("Response cache schema initialized");
        Ok(())
    }

    /// Insert or update `response` and record the audit event
    pub async fn upsert(&self, response: &CachedResponse) -> Result<UpdateEvent> {
        let patch = response.to_patch();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                r#"
                INSERT INTO http_cache_items (id, url, status, headers, body, fetched_at, last_scraped)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (url) DO UPDATE SET
                    status = EXCLUDED.status,
                    headers = EXCLUDED.headers,
                    body = EXCLUDED.body,
                    fetched_at = EXCLUDED.fetched_at,
                    last_scraped = NOW()
                RETURNING id
                "#,
                &[
                    &Uuid::new_v4(),
                    &response.natural_key(),
                    &patch.status,
                    &patch.headers,
                    &patch.body,
                    &patch.fetched_at,
                ],
            )
            .await?;
        let id: Uuid = row.get(0);

        let event = UpdateEvent::for_entity::<CachedResponse>(id);
        let kind = event.kind.as_str();
        tx.execute(
            "INSERT INTO scrape_updates (id, scrape_type, created_at, scrape_base_id) \
             VALUES ($1, $2, $3, $4)",
            &[&event.id, &kind, &event.created_at, &event.entity_id],
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(url = %response.url, id = %id, "Upserted cache item");
        Ok(event)
    }

    /// Audit events recorded for `url`, oldest first
    pub async fn audit_trail(&self, url: &str) -> Result<Vec<UpdateEvent>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT u.id, u.scrape_type, u.scrape_base_id, u.created_at
                FROM scrape_updates u
                JOIN http_cache_items c ON c.id = u.scrape_base_id
                WHERE c.url = $1
                ORDER BY u.created_at
                "#,
                &[&url],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get(1);
                Ok(UpdateEvent {
                    id: row.get(0),
                    kind: kind.parse().map_err(Error::decode)?,
                    entity_id: row.get(2),
                    created_at: row.get(3),
                })
            })
            .collect()
    }
}

fn row_to_response(row: &Row) -> Result<CachedResponse> {
    let url: String = row.get(0);
    let status: i32 = row.get(1);
    let headers: Option<Vec<u8>> = row.get(2);
    let body: Vec<u8> = row.get(3);

    let status = u16::try_from(status)
        .map_err(|_| Error::decode(format!("status {status} out of range for {url}")))?;
    let body = lz4_flex::block::decompress_size_prepended(&body)
        .map_err(|e| Error::decode(format!("body of {url}: {e}")))?;

    Ok(CachedResponse {
        status,
        headers: headers.unwrap_or_default(),
        body,
        fetched_at: row.get(4),
        url,
    })
}

#[async_trait]
impl CacheBackend for PgCache {
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn put(&self, response: &CachedResponse) -> Result<()> {
        self.upsert(response).await.map(|_| ())
    }

    async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(SELECT_BY_URL, &[&url]).await?;
        row.as_ref().map(row_to_response).transpose()
    }

    async fn get_all(&self, filter_url: Option<&str>) -> Result<CacheScan> {
        let client = self.pool.get().await?;
        let rows = match filter_url {
            Some(url) => client.query(SELECT_BY_URL, &[&url]).await?,
            None => client.query(SELECT_ALL, &[]).await?,
        };

        let mut scan = CacheScan::default();
        for row in &rows {
            match row_to_response(row) {
                Ok(response) => scan.entries.push(response),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping corrupt cache row");
                    scan.corrupt += 1;
                }
            }
        }
        Ok(scan)
    }

    async fn urls(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        // LIMIT NULL means no limit
        let limit: Option<i64> = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        let rows = client
            .query("SELECT url FROM http_cache_items LIMIT $1", &[&limit])
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn len(&self) -> Result<usize> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM http_cache_items", &[])
            .await?;
        let count: i64 = row.get(0);
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
