//! In-process [`KvStore`] for tests and dry runs
//!
//! Mirrors the Redis behaviours the rest of the crate relies on: missing keys
//! read as empty, keys disappear once their last element is removed, and a
//! command against a key of the wrong type fails with `WRONGTYPE`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{KvStore, ScoredMember};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Value {
    List(VecDeque<String>),
    ZSet(HashMap<String, f64>),
    Hash(BTreeMap<String, Vec<u8>>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Self::List(list) => list.is_empty(),
            Self::ZSet(set) => set.is_empty(),
            Self::Hash(hash) => hash.is_empty(),
        }
    }
}

/// In-memory store with Redis list, sorted-set and hash semantics
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
    fail_next: AtomicUsize,
    ops: AtomicUsize,
}

fn wrong_type() -> Error {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE",
        "Operation against a key holding the wrong kind of value".to_string(),
    ))
    .into()
}

/// Resolve a Redis-style inclusive range against a collection of `len` items
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn sorted_members(set: &HashMap<String, f64>) -> Vec<ScoredMember> {
    let mut members: Vec<ScoredMember> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with a transient error
    pub fn inject_failures(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of operations served so far, including failed ones
    pub fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    /// Overwrite a hash field without any type or encoding checks
    pub fn insert_raw(&self, key: &str, field: &str, value: Vec<u8>) {
        let mut data = self.lock();
        if let Value::Hash(hash) = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(BTreeMap::new()))
        {
            hash.insert(field.to_string(), value);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the data lock, honouring injected failures
    fn begin(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Unavailable("injected failure".to_string()));
        }
        Ok(self.lock())
    }
}

fn list_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut VecDeque<String>> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Value::List(VecDeque::new()))
    {
        Value::List(list) => Ok(list),
        _ => Err(wrong_type()),
    }
}

fn zset_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut HashMap<String, f64>> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Value::ZSet(HashMap::new()))
    {
        Value::ZSet(set) => Ok(set),
        _ => Err(wrong_type()),
    }
}

fn hash_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut BTreeMap<String, Vec<u8>>> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Value::Hash(BTreeMap::new()))
    {
        Value::Hash(hash) => Ok(hash),
        _ => Err(wrong_type()),
    }
}

fn list_ref<'a>(data: &'a HashMap<String, Value>, key: &str) -> Result<Option<&'a VecDeque<String>>> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(wrong_type()),
    }
}

fn zset_ref<'a>(
    data: &'a HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a HashMap<String, f64>>> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::ZSet(set)) => Ok(Some(set)),
        Some(_) => Err(wrong_type()),
    }
}

fn hash_ref<'a>(
    data: &'a HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a BTreeMap<String, Vec<u8>>>> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(wrong_type()),
    }
}

/// Drop `key` if its value became empty
fn prune(data: &mut HashMap<String, Value>, key: &str) {
    if data.get(key).is_some_and(Value::is_empty) {
        data.remove(key);
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        let mut data = self.begin()?;
        let list = list_mut(&mut data, key)?;
        for value in values {
            list.push_front(value.clone());
        }
        let len = list.len();
        prune(&mut data, key);
        Ok(len)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<usize> {
        let mut data = self.begin()?;
        let list = list_mut(&mut data, key)?;
        list.extend(values.iter().cloned());
        let len = list.len();
        prune(&mut data, key);
        Ok(len)
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let mut data = self.begin()?;
        if list_ref(&data, key)?.is_none() {
            return Ok(Vec::new());
        }
        let list = list_mut(&mut data, key)?;
        let take = count.min(list.len());
        let popped: Vec<String> = list.drain(..take).collect();
        prune(&mut data, key);
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let data = self.begin()?;
        Ok(list_ref(&data, key)?.map_or(0, VecDeque::len))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let data = self.begin()?;
        let Some(list) = list_ref(&data, key)? else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize> {
        let mut data = self.begin()?;
        if list_ref(&data, key)?.is_none() {
            return Ok(0);
        }
        let list = list_mut(&mut data, key)?;
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs()
        };

        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        prune(&mut data, key);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let data = self.begin()?;
        Ok(data.contains_key(key))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut data = self.begin()?;
        Ok(data.remove(key).is_some())
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        let mut data = self.begin()?;
        let set = zset_mut(&mut data, key)?;
        let mut added = 0;
        for (member, score) in members {
            if set.insert(member.clone(), *score).is_none() {
                added += 1;
            }
        }
        prune(&mut data, key);
        Ok(added)
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        rev: bool,
    ) -> Result<Vec<ScoredMember>> {
        let data = self.begin()?;
        let Some(set) = zset_ref(&data, key)? else {
            return Ok(Vec::new());
        };
        let mut members = sorted_members(set);
        if rev {
            members.reverse();
        }
        Ok(match resolve_range(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>> {
        let data = self.begin()?;
        let Some(set) = zset_ref(&data, key)? else {
            return Ok(Vec::new());
        };
        Ok(sorted_members(set)
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .collect())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let data = self.begin()?;
        Ok(zset_ref(&data, key)?.and_then(|set| set.get(member).copied()))
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize> {
        let mut data = self.begin()?;
        if zset_ref(&data, key)?.is_none() {
            return Ok(0);
        }
        let set = zset_mut(&mut data, key)?;
        let removed = members.iter().filter(|m| set.remove(*m).is_some()).count();
        prune(&mut data, key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let data = self.begin()?;
        Ok(zset_ref(&data, key)?.map_or(0, HashMap::len))
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut data = self.begin()?;
        hash_mut(&mut data, key)?.insert(field.to_string(), value.to_vec());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let data = self.begin()?;
        Ok(hash_ref(&data, key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let data = self.begin()?;
        Ok(hash_ref(&data, key)?.is_some_and(|hash| hash.contains_key(field)))
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let data = self.begin()?;
        let hash = hash_ref(&data, key)?;
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(field).cloned()))
            .collect())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let data = self.begin()?;
        Ok(hash_ref(&data, key)?
            .map(|hash| hash.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.begin()?;
        Ok(hash_ref(&data, key)?
            .map(|hash| hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        let mut data = self.begin()?;
        if hash_ref(&data, key)?.is_none() {
            return Ok(0);
        }
        let hash = hash_mut(&mut data, key)?;
        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
        prune(&mut data, key);
        Ok(removed)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let data = self.begin()?;
        Ok(hash_ref(&data, key)?.map_or(0, BTreeMap::len))
    }

    async fn put_indexed(
        &self,
        hash_key: &str,
        zset_key: &str,
        field: &str,
        value: &[u8],
        score: f64,
    ) -> Result<()> {
        let mut data = self.begin()?;
        // Type-check both keys before writing either
        hash_ref(&data, hash_key)?;
        zset_ref(&data, zset_key)?;
        hash_mut(&mut data, hash_key)?.insert(field.to_string(), value.to_vec());
        zset_mut(&mut data, zset_key)?.insert(field.to_string(), score);
        Ok(())
    }

    async fn remove_indexed(
        &self,
        hash_key: &str,
        zset_key: &str,
        fields: &[String],
    ) -> Result<usize> {
        let mut data = self.begin()?;
        let has_hash = hash_ref(&data, hash_key)?.is_some();
        let has_zset = zset_ref(&data, zset_key)?.is_some();

        let mut removed = 0;
        if has_hash {
            let hash = hash_mut(&mut data, hash_key)?;
            removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
            prune(&mut data, hash_key);
        }
        if has_zset {
            let set = zset_mut(&mut data, zset_key)?;
            for field in fields {
                set.remove(field);
            }
            prune(&mut data, zset_key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, RecrawlErrorTrait};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_push_pop_order() {
        let store = MemoryStore::new();
        store.rpush("q", &strings(&["a", "b"])).await.unwrap();
        store.lpush("q", &strings(&["z"])).await.unwrap();

        assert_eq!(store.lrange("q", 0, -1).await.unwrap(), strings(&["z", "a", "b"]));
        assert_eq!(store.lpop("q", 2).await.unwrap(), strings(&["z", "a"]));
        assert_eq!(store.llen("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_key_is_removed() {
        let store = MemoryStore::new();
        store.rpush("q", &strings(&["a"])).await.unwrap();
        store.lpop("q", 10).await.unwrap();
        assert!(!store.exists("q").await.unwrap());
        assert!(store.lpop("q", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lrem_directions() {
        let store = MemoryStore::new();
        store
            .rpush("q", &strings(&["null", "a", "null", "b", "null"]))
            .await
            .unwrap();

        assert_eq!(store.lrem("q", 1, "null").await.unwrap(), 1);
        assert_eq!(store.lrange("q", 0, -1).await.unwrap(), strings(&["a", "null", "b", "null"]));

        assert_eq!(store.lrem("q", -1, "null").await.unwrap(), 1);
        assert_eq!(store.lrange("q", 0, -1).await.unwrap(), strings(&["a", "null", "b"]));

        assert_eq!(store.lrem("q", 0, "null").await.unwrap(), 1);
        assert_eq!(store.lrange("q", 0, -1).await.unwrap(), strings(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_zrange_ordering_and_ranks() {
        let store = MemoryStore::new();
        store
            .zadd(
                "z",
                &[("b".into(), 2.0), ("a".into(), 1.0), ("c".into(), 3.0)],
            )
            .await
            .unwrap();

        let asc = store.zrange_withscores("z", 0, 1, false).await.unwrap();
        assert_eq!(asc, vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)]);

        let desc = store.zrange_withscores("z", 0, 0, true).await.unwrap();
        assert_eq!(desc, vec![("c".to_string(), 3.0)]);

        let all = store.zrange_withscores("z", 0, -1, false).await.unwrap();
        assert_eq!(all.len(), 3);

        let window = store.zrangebyscore_withscores("z", 1.5, 3.0).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_zadd_updates_existing_member() {
        let store = MemoryStore::new();
        assert_eq!(store.zadd("z", &[("a".into(), 1.0)]).await.unwrap(), 1);
        assert_eq!(store.zadd("z", &[("a".into(), 5.0)]).await.unwrap(), 0);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
        assert_eq!(store.zscore("z", "a").await.unwrap(), Some(5.0));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.rpush("k", &strings(&["a"])).await.unwrap();

        let err = store.hget("k", "f").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Corruption);
    }

    #[tokio::test]
    async fn test_hmget_alignment() {
        let store = MemoryStore::new();
        store.hset("h", "a", b"1").await.unwrap();
        store.hset("h", "c", b"3").await.unwrap();

        let values = store.hmget("h", &strings(&["a", "b", "c"])).await.unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
    }

    #[tokio::test]
    async fn test_hexists() {
        let store = MemoryStore::new();
        assert!(!store.hexists("h", "a").await.unwrap());

        store.hset("h", "a", b"1").await.unwrap();
        assert!(store.hexists("h", "a").await.unwrap());
        assert!(!store.hexists("h", "b").await.unwrap());

        store.hdel("h", &strings(&["a"])).await.unwrap();
        assert!(!store.hexists("h", "a").await.unwrap());
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_indexed_put_and_remove() {
        let store = MemoryStore::new();
        store.put_indexed("h", "z", "u1", b"x", 10.0).await.unwrap();
        store.put_indexed("h", "z", "u2", b"y", 20.0).await.unwrap();

        assert_eq!(store.hlen("h").await.unwrap(), 2);
        assert_eq!(store.zcard("z").await.unwrap(), 2);

        let removed = store.remove_indexed("h", "z", &strings(&["u1"])).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.hkeys("h").await.unwrap(), strings(&["u2"]));
        assert_eq!(store.zscore("z", "u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let store = MemoryStore::new();
        store.inject_failures(2);

        assert!(store.llen("q").await.unwrap_err().is_recoverable());
        assert!(store.llen("q").await.is_err());
        assert_eq!(store.llen("q").await.unwrap(), 0);
        assert_eq!(store.op_count(), 3);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 9), Some((0, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(5, 0, -10), None);
    }
}
