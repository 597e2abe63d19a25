//! Redis-backed [`KvStore`] over a deadpool connection pool

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;

use super::{KvStore, ScoredMember};
use crate::error::{Error, Result};

/// Redis store client
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    url: String,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| Error::config(format!("Failed to create pool builder: {e}")))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::config(format!("Failed to create Redis connection pool: {e}")))?;

        let store = Self {
            pool,
            url: url.to_string(),
        };

        let mut conn = store.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!(url = %url, "Connected to Redis");

        Ok(store)
    }

    /// Connection URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let mut conn = self.conn().await?;
        Ok(conn.lpush(key, values).await?)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let mut conn = self.conn().await?;
        Ok(conn.rpush(key, values).await?)
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // LPOP with a count replies nil for a missing key
        let values: Option<Vec<String>> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(values.unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.lrem(key, count, value).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let items: Vec<(f64, &str)> = members
            .iter()
            .map(|(member, score)| (*score, member.as_str()))
            .collect();
        let mut conn = self.conn().await?;
        Ok(conn.zadd_multiple(key, items.as_slice()).await?)
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        rev: bool,
    ) -> Result<Vec<ScoredMember>> {
        let mut conn = self.conn().await?;
        let members = if rev {
            conn.zrevrange_withscores(key, start, stop).await?
        } else {
            conn.zrange_withscores(key, start, stop).await?
        };
        Ok(members)
    }

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>> {
        let mut conn = self.conn().await?;
        Ok(conn.zrangebyscore_withscores(key, min, max).await?)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.conn().await?;
        Ok(conn.zscore(key, member).await?)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(conn.zrem(key, members).await?)
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.hexists(key, field).await?)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // HMGET always replies with an array, even for a single field
        let values: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hkeys(key).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn().await?;
        let entries: HashMap<String, Vec<u8>> = conn.hgetall(key).await?;
        Ok(entries.into_iter().collect())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(conn.hdel(key, fields).await?)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.hlen(key).await?)
    }

    async fn put_indexed(
        &self,
        hash_key: &str,
        zset_key: &str,
        field: &str,
        value: &[u8],
        score: f64,
    ) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(hash_key, field, value)
            .ignore()
            .zadd(zset_key, field, score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_indexed(
        &self,
        hash_key: &str,
        zset_key: &str,
        fields: &[String],
    ) -> Result<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let (removed, _): (usize, usize) = redis::pipe()
            .atomic()
            .hdel(hash_key, fields)
            .zrem(zset_key, fields)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}
