//! Store capability required by the job store.
//!
//! Any backend offering ordered lists with index access, a conditional
//! in-place update, and a flat key-value namespace can hold the queue.
//! Redis is the production backend; [`MemoryBackend`] serves tests and
//! single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};

/// Primitive operations on lists and keys.
///
/// Every call is atomic on its own; sequences of calls are not.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Append a value to the tail of a list.
    async fn push_tail(&self, list: &str, value: &str) -> QueueResult<()>;

    /// Read the value at `index` (negative counts from the tail).
    async fn index(&self, list: &str, index: isize) -> QueueResult<Option<String>>;

    /// Remove the first occurrence of `value`. Returns the number removed.
    async fn remove(&self, list: &str, value: &str) -> QueueResult<usize>;

    /// Number of entries in a list (0 when missing).
    async fn len(&self, list: &str) -> QueueResult<usize>;

    /// All entries of a list, head first.
    async fn range(&self, list: &str) -> QueueResult<Vec<String>>;

    /// Overwrite the value at `index`.
    async fn set_index(&self, list: &str, index: isize, value: &str) -> QueueResult<()>;

    /// Overwrite the value at `index` only if it currently equals `expected`.
    async fn compare_and_set_index(
        &self,
        list: &str,
        index: isize,
        expected: &str,
        value: &str,
    ) -> QueueResult<bool>;

    async fn set(&self, key: &str, value: &str) -> QueueResult<()>;

    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    /// Delete a key of any type (value or list).
    async fn delete(&self, key: &str) -> QueueResult<()>;

    /// Keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> QueueResult<Vec<String>>;
}

const CAS_INDEX_SCRIPT: &str = r#"
local current = redis.call('LINDEX', KEYS[1], ARGV[1])
if current == ARGV[2] then
    redis.call('LSET', KEYS[1], ARGV[1], ARGV[3])
    return 1
end
return 0
"#;

/// Redis-backed store.
pub struct RedisBackend {
    client: redis::Client,
    cas_script: redis::Script,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            cas_script: redis::Script::new(CAS_INDEX_SCRIPT),
        })
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::store_unavailable(e.to_string()))
    }

    /// Check connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn push_tail(&self, list: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(list, value).await?;
        Ok(())
    }

    async fn index(&self, list: &str, index: isize) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lindex(list, index).await?)
    }

    async fn remove(&self, list: &str, value: &str) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.lrem(list, 1, value).await?)
    }

    async fn len(&self, list: &str) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(list).await?)
    }

    async fn range(&self, list: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(list, 0, -1).await?)
    }

    async fn set_index(&self, list: &str, index: isize, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.lset::<_, _, ()>(list, index, value).await?;
        Ok(())
    }

    async fn compare_and_set_index(
        &self,
        list: &str,
        index: isize,
        expected: &str,
        value: &str,
    ) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let swapped: i32 = self
            .cas_script
            .key(list)
            .arg(index)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        debug!("CAS on {}[{}] -> {}", list, index, swapped == 1);
        Ok(swapped == 1)
    }

    async fn set(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.keys(format!("{}*", prefix)).await?)
    }
}

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, Vec<String>>,
    values: HashMap<String, String>,
}

/// In-process store with Redis list semantics.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `StoreUnavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::store_unavailable("memory backend offline"))
        }
    }

    fn resolve(len: usize, index: isize) -> Option<usize> {
        let resolved = if index < 0 { len as isize + index } else { index };
        (resolved >= 0 && (resolved as usize) < len).then_some(resolved as usize)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn push_tail(&self, list: &str, value: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.lists.entry(list.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn index(&self, list: &str, index: isize) -> QueueResult<Option<String>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(list)
            .and_then(|l| Self::resolve(l.len(), index).map(|i| l[i].clone())))
    }

    async fn remove(&self, list: &str, value: &str) -> QueueResult<usize> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(entries) = state.lists.get_mut(list) else {
            return Ok(0);
        };
        match entries.iter().position(|v| v == value) {
            Some(pos) => {
                entries.remove(pos);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn len(&self, list: &str) -> QueueResult<usize> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map(Vec::len).unwrap_or(0))
    }

    async fn range(&self, list: &str) -> QueueResult<Vec<String>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(list).cloned().unwrap_or_default())
    }

    async fn set_index(&self, list: &str, index: isize, value: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        let entries = state.lists.get_mut(list);
        match entries.and_then(|l| Self::resolve(l.len(), index).map(|i| (l, i))) {
            Some((entries, i)) => {
                entries[i] = value.to_string();
                Ok(())
            }
            None => Err(QueueError::IndexOutOfRange {
                list: list.to_string(),
                index,
            }),
        }
    }

    async fn compare_and_set_index(
        &self,
        list: &str,
        index: isize,
        expected: &str,
        value: &str,
    ) -> QueueResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(entries) = state.lists.get_mut(list) else {
            return Ok(false);
        };
        match Self::resolve(entries.len(), index) {
            Some(i) if entries[i] == expected => {
                entries[i] = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set(&self, key: &str, value: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.values.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.values.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> QueueResult<Vec<String>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .values
            .keys()
            .chain(state.lists.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
