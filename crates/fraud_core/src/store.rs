//! Abstract key-value store used for probe caches, velocity counters, the
//! recent-email windows, the enrichment queue and the results store.
//!
//! The trait mirrors the small Redis subset the engine needs (GET/SET with
//! TTL, atomic INCR+EXPIRE, bounded list push, FIFO queue, SETNX-style lock
//! tokens). `MemoryStore` is the in-process implementation; a networked
//! backend slots in behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Failure talking to the backing store. Callers treat this as a degraded
/// condition, not a hard error (see the engine's fail-open policy).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set `key` to `value`, with an optional expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns true when the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment a counter, applying `ttl` when the key is created.
    /// Returns the post-increment value.
    async fn incr_expire(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    /// Push `value` to the front of a list, trimming it to `max_len` entries
    /// (oldest out) and refreshing the optional TTL.
    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// All entries of a list, most recently pushed first.
    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// FIFO queue append.
    async fn queue_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// FIFO queue pop; `None` when the queue is empty.
    async fn queue_pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Pop from a FIFO queue, waiting up to `wait` for an item to arrive.
    ///
    /// The default implementation polls with a fixed backoff for backends
    /// without wakeup support.
    async fn queue_pop_wait(&self, key: &str, wait: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.queue_pop(key).await? {
                return Ok(Some(item));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// SETNX-style lock token with expiry. Returns true when acquired.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn release_lock(&self, key: &str) -> StoreResult<()>;

    /// Live keys starting with `prefix`. Admin/stats use only.
    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remaining TTL of a key, `None` when the key has no expiry or is absent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn ping(&self) -> StoreResult<()>;
}

enum Value {
    Text(String),
    List(VecDeque<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

/// In-process store backed by a concurrent map with lazy expiry.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Entry>,
    queue_signal: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expires(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|t| Instant::now() + t)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.map.get(key) {
            Some(entry) if !entry.expired() => match &entry.value {
                Value::Text(s) => Ok(Some(s.clone())),
                Value::List(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Self::expires(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.map.remove(key).is_some())
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Text("0".to_string()),
            expires_at: Self::expires(Some(ttl)),
        });
        if entry.expired() {
            entry.value = Value::Text("0".to_string());
            entry.expires_at = Self::expires(Some(ttl));
        }
        let current = match &entry.value {
            Value::Text(s) => s.parse::<i64>().unwrap_or(0),
            Value::List(_) => 0,
        };
        let next = current + 1;
        entry.value = Value::Text(next.to_string());
        Ok(next)
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if entry.expired() {
            entry.value = Value::List(VecDeque::new());
        }
        if !matches!(entry.value, Value::List(_)) {
            entry.value = Value::List(VecDeque::new());
        }
        if let Value::List(list) = &mut entry.value {
            list.push_front(value.to_string());
            while list.len() > max_len {
                list.pop_back();
            }
        }
        entry.expires_at = Self::expires(ttl);
        Ok(())
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.map.get(key) {
            Some(entry) if !entry.expired() => match &entry.value {
                Value::List(list) => Ok(list.iter().cloned().collect()),
                Value::Text(_) => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        match self.map.get(key) {
            Some(entry) if !entry.expired() => match &entry.value {
                Value::List(list) => Ok(list.len()),
                Value::Text(_) => Ok(0),
            },
            _ => Ok(0),
        }
    }

    async fn queue_push(&self, key: &str, value: &str) -> StoreResult<()> {
        {
            let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            if let Value::List(list) = &mut entry.value {
                list.push_back(value.to_string());
            } else {
                entry.value = Value::List(VecDeque::from([value.to_string()]));
            }
        }
        self.queue_signal.notify_one();
        Ok(())
    }

    async fn queue_pop(&self, key: &str) -> StoreResult<Option<String>> {
        match self.map.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::List(list) => Ok(list.pop_front()),
                Value::Text(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn queue_pop_wait(&self, key: &str, wait: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.queue_pop(key).await? {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = self.queue_signal.notified() => {}
                _ = tokio::time::sleep(deadline - now) => return Ok(None),
            }
        }
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self.map.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expired() {
                    occupied.insert(Entry {
                        value: Value::Text("1".to_string()),
                        expires_at: Self::expires(Some(ttl)),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::Text("1".to_string()),
                    expires_at: Self::expires(Some(ttl)),
                });
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> StoreResult<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let keys = self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().expired())
            .map(|entry| entry.key().clone())
            .collect();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        match self.map.get(key) {
            Some(entry) if !entry.expired() => {
                Ok(entry.expires_at.map(|at| at.saturating_duration_since(Instant::now())))
            }
            _ => Ok(None),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        debug!("memory store ping");
        Ok(())
    }
}
