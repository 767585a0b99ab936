//! Fast-path key/value store
//!
//! The engines only need a small Redis-shaped surface: string values with
//! TTLs, atomic counters, set-if-absent, a FIFO list, and prefix scans.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use verity_core::{Clock, Error, Result};

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// One round trip for many keys. The result lines up with `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Pipelined `set_ex` sharing one TTL.
    async fn set_many_ex(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key that starts with `prefix` and ends with `suffix`.
    async fn delete_matching(&self, prefix: &str, suffix: &str) -> Result<u64>;

    /// Atomic increment. A missing key counts from zero, so the first call
    /// returns 1.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Time left before `key` expires. `None` for missing or persistent keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Atomic set-if-absent. Returns whether this caller set it.
    async fn set_nx_ex(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    /// Append to a list, returning its new length.
    async fn push_back(&self, key: &str, value: String) -> Result<u64>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache over a `DashMap`. Expired entries read as absent and
/// are dropped on the next touch.
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn deadline(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::cache(e))?;
        Ok(self.clock.now() + ttl)
    }

    fn read_text(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let Some(slot) = self.entries.get(key) else {
            return Ok(None);
        };
        if !slot.live(now) {
            drop(slot);
            self.entries.remove_if(key, |_, s| !s.live(now));
            return Ok(None);
        }
        match &slot.value {
            Value::Text(s) => Ok(Some(s.clone())),
            Value::List(_) => Err(Error::cache(format!("{key} holds a list"))),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.live(now));
        before - self.entries.len()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read_text(key)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|k| self.read_text(k)).collect()
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Some(self.deadline(ttl)?);
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_many_ex(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()> {
        let expires_at = Some(self.deadline(ttl)?);
        for (key, value) in entries {
            self.entries.insert(
                key,
                Slot {
                    value: Value::Text(value),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, slot)| slot.live(now)))
    }

    async fn delete_matching(&self, prefix: &str, suffix: &str) -> Result<u64> {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|key, slot| {
            let hit = key.starts_with(prefix) && key.ends_with(suffix);
            if hit && slot.live(now) {
                removed += 1;
            }
            !hit
        });
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = self.clock.now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if !slot.live(now) {
                    *slot = Slot {
                        value: Value::Text("1".into()),
                        expires_at: None,
                    };
                    return Ok(1);
                }
                let Value::Text(text) = &mut slot.value else {
                    return Err(Error::cache(format!("{key} holds a list")));
                };
                let next = text
                    .parse::<i64>()
                    .map_err(|_| Error::cache(format!("{key} is not an integer")))?
                    + 1;
                *text = next.to_string();
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Text("1".into()),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl)?;
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.live(now) => {
                slot.expires_at = Some(deadline);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        Ok(self.entries.get(key).and_then(|slot| {
            if !slot.live(now) {
                return None;
            }
            slot.expires_at.and_then(|at| (at - now).to_std().ok())
        }))
    }

    async fn set_nx_ex(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let slot = Slot {
            value: Value::Text(value),
            expires_at: Some(self.deadline(ttl)?),
        };
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().live(now) {
                    return Ok(false);
                }
                occupied.insert(slot);
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn push_back(&self, key: &str, value: String) -> Result<u64> {
        let now = self.clock.now();
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if !slot.live(now) {
            *slot = Slot {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            };
        }
        match &mut slot.value {
            Value::List(list) => {
                list.push_back(value);
                Ok(list.len() as u64)
            }
            Value::Text(_) => Err(Error::cache(format!("{key} is not a list"))),
        }
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let popped = match self.entries.get_mut(key) {
            Some(mut slot) if slot.live(now) => match &mut slot.value {
                Value::List(list) => list.pop_front(),
                Value::Text(_) => return Err(Error::cache(format!("{key} is not a list"))),
            },
            _ => None,
        };
        // an emptied list disappears, like Redis
        self.entries
            .remove_if(key, |_, s| matches!(&s.value, Value::List(l) if l.is_empty()));
        Ok(popped)
    }
}

// ---------------------------------------------------------------------------
// UnavailableCache
// ---------------------------------------------------------------------------

/// A cache whose every call fails, like an unreachable server (for tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCache;

fn down<T>() -> Result<T> {
    Err(Error::cache("cache unavailable"))
}

#[async_trait::async_trait]
impl CacheStore for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        down()
    }

    async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<String>>> {
        down()
    }

    async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        down()
    }

    async fn set_many_ex(&self, _entries: Vec<(String, String)>, _ttl: Duration) -> Result<()> {
        down()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        down()
    }

    async fn delete_matching(&self, _prefix: &str, _suffix: &str) -> Result<u64> {
        down()
    }

    async fn incr(&self, _key: &str) -> Result<i64> {
        down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        down()
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        down()
    }

    async fn set_nx_ex(&self, _key: &str, _value: String, _ttl: Duration) -> Result<bool> {
        down()
    }

    async fn push_back(&self, _key: &str, _value: String) -> Result<u64> {
        down()
    }

    async fn pop_front(&self, _key: &str) -> Result<Option<String>> {
        down()
    }
}
