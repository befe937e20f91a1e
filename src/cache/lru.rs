// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Count-bounded LRU cache with per-entry ttl.
//!
//! The list and the key index live under one mutex and always agree on
//! membership. The front of the list is the most recently used entry;
//! when an insert finds the cache full or the tail expired, the tail slot
//! is repurposed (key swapped in the index) instead of being reallocated,
//! and eviction always takes the tail.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use serde_json::json;

use crate::cache::{Item, arena::LinkedArena};

struct Entry<V> {
    key: String,
    value: V,
    access_time: Instant,
    /// Relative expiry: an entry is gone once `access_time + ttl` passes.
    /// Zero means it never expires.
    ttl: Duration,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(self.access_time) >= self.ttl
    }
}

struct Inner<V> {
    list: LinkedArena<Entry<V>>,
    table: HashMap<String, usize>,
    capacity: i64,
    ttl: Duration,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub length: i64,
    pub size: i64,
    pub capacity: i64,
    pub oldest_access: Option<Instant>,
}

pub struct LruCache<V> {
    inner: Mutex<Inner<V>>,
}

impl<V> LruCache<V> {
    /// An empty cache holding at most `capacity` entries, each expiring
    /// `ttl` after its last access (zero ttl disables expiry).
    pub fn new(capacity: i64, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                list: LinkedArena::new(),
                table: HashMap::new(),
                capacity,
                ttl,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_default_ttl(&self, ttl: Duration) {
        self.lock().ttl = ttl;
    }

    /// Marks the entry as most recently used and refreshes its access
    /// time. Expired entries read as misses.
    pub fn get(&self, key: &str) -> Option<V>
    where V: Clone {
        let mut inner = self.lock();
        let idx = *inner.table.get(key)?;
        let now = Instant::now();
        let entry = inner.list.value_mut(idx)?;
        if entry.expired(now) {
            return None;
        }
        entry.access_time = now;
        let value = entry.value.clone();
        inner.list.move_to_front(idx);
        Some(value)
    }

    /// Reads without touching the LRU order or the access time.
    pub fn peek(&self, key: &str) -> Option<V>
    where V: Clone {
        let inner = self.lock();
        let idx = *inner.table.get(key)?;
        let entry = inner.list.value(idx)?;
        if entry.expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn is_existed(&self, key: &str) -> bool {
        let inner = self.lock();
        inner
            .table
            .get(key)
            .and_then(|&idx| inner.list.value(idx))
            .is_some_and(|e| !e.expired(Instant::now()))
    }

    pub fn set(&self, key: &str, value: V) {
        let mut inner = self.lock();
        let ttl = inner.ttl;
        inner.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.lock().set_with_ttl(key, value, ttl);
    }

    /// Keeps an existing live value untouched (refreshing its ttl and LRU
    /// slot); inserts otherwise. The bool reports whether the insert
    /// happened.
    pub fn set_if_absent(&self, key: &str, value: V) -> (V, bool)
    where V: Clone {
        let mut inner = self.lock();
        if let Some(&idx) = inner.table.get(key) {
            let now = Instant::now();
            let default_ttl = inner.ttl;
            if let Some(entry) = inner.list.value_mut(idx)
                && !entry.expired(now)
            {
                entry.ttl = default_ttl;
                entry.access_time = now;
                let existing = entry.value.clone();
                inner.list.move_to_front(idx);
                return (existing, false);
            }
        }
        let ttl = inner.ttl;
        inner.set_with_ttl(key, value.clone(), ttl);
        (value, true)
    }

    /// Adjusts an entry's ttl in place, restarting it from now; a zero
    /// ttl disables expiry. Unknown keys are ignored.
    pub fn set_expiration(&self, key: &str, ttl: Duration) {
        let mut inner = self.lock();
        let Some(&idx) = inner.table.get(key) else {
            return;
        };
        if let Some(entry) = inner.list.value_mut(idx) {
            entry.ttl = ttl;
            entry.access_time = Instant::now();
        }
    }

    /// Marks an entry expired without removing it; reports whether it
    /// existed.
    pub fn set_expired(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(&idx) = inner.table.get(key) else {
            return false;
        };
        if let Some(entry) = inner.list.value_mut(idx) {
            entry.ttl = Duration::from_nanos(1);
        }
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(idx) = inner.table.remove(key) else {
            return false;
        };
        inner.list.remove(idx);
        true
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.list.clear();
        inner.table.clear();
    }

    /// Shrinks the cache immediately when the new capacity is exceeded.
    pub fn set_capacity(&self, capacity: i64) {
        let mut inner = self.lock();
        inner.capacity = capacity;
        inner.check_capacity();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            length: inner.list.len() as i64,
            size: inner.list.len() as i64,
            capacity: inner.capacity,
            oldest_access: inner
                .list
                .tail()
                .and_then(|idx| inner.list.value(idx))
                .map(|e| e.access_time),
        }
    }

    pub fn stats_json(&self) -> String {
        let stats = self.stats();
        json!({
            "Length": stats.length,
            "Size": stats.size,
            "Capacity": stats.capacity,
            "OldestAccessAgeSecs": stats
                .oldest_access
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
        })
        .to_string()
    }

    pub fn length(&self) -> i64 {
        self.lock().list.len() as i64
    }

    pub fn size(&self) -> i64 {
        self.length()
    }

    pub fn capacity(&self) -> i64 {
        self.lock().capacity
    }

    pub fn free_size(&self) -> i64 {
        let inner = self.lock();
        inner.capacity - inner.list.len() as i64
    }

    pub fn oldest(&self) -> Option<Instant> {
        let inner = self.lock();
        inner
            .list
            .tail()
            .and_then(|idx| inner.list.value(idx))
            .map(|e| e.access_time)
    }

    pub fn newest(&self) -> Option<Instant> {
        let inner = self.lock();
        inner
            .list
            .head()
            .and_then(|idx| inner.list.value(idx))
            .map(|e| e.access_time)
    }

    /// All keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.lock();
        inner.list.iter().map(|e| e.key.clone()).collect()
    }

    /// All entries, most recently used first.
    pub fn items(&self) -> Vec<Item<V>>
    where V: Clone {
        let inner = self.lock();
        inner
            .list
            .iter()
            .map(|e| Item {
                key: e.key.clone(),
                value: e.value.clone(),
            })
            .collect()
    }

    /// Up to `max_count` entries in no particular order.
    pub fn random_items(&self, max_count: usize) -> Vec<Item<V>>
    where V: Clone {
        let inner = self.lock();
        inner
            .table
            .iter()
            .take(max_count)
            .filter_map(|(key, &idx)| {
                inner.list.value(idx).map(|e| Item {
                    key: key.clone(),
                    value: e.value.clone(),
                })
            })
            .collect()
    }
}

impl<V> Inner<V> {
    /// Single insert path: update in place, repurpose the tail, or grow.
    fn set_with_ttl(&mut self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        if let Some(&idx) = self.table.get(key) {
            if let Some(entry) = self.list.value_mut(idx) {
                entry.value = value;
                entry.ttl = ttl;
                entry.access_time = now;
            }
            self.list.move_to_front(idx);
            return;
        }

        // Repurpose the tail when the cache is full or the tail expired.
        let repurpose = match self.list.tail() {
            Some(tail) => {
                let full = (self.list.len() as i64) >= self.capacity;
                let tail_expired = self
                    .list
                    .value(tail)
                    .is_some_and(|e| e.expired(now));
                (full || tail_expired).then_some(tail)
            },
            None => None,
        };

        match repurpose {
            Some(tail) => {
                if let Some(old_key) =
                    self.list.value(tail).map(|e| e.key.clone())
                {
                    self.table.remove(&old_key);
                }
                if let Some(entry) = self.list.value_mut(tail) {
                    entry.key = key.to_string();
                    entry.value = value;
                    entry.ttl = ttl;
                    entry.access_time = now;
                }
                self.table.insert(key.to_string(), tail);
                self.list.move_to_front(tail);
            },
            None => self.add_new(key, value, ttl, now),
        }
        self.check_capacity();
    }

    fn add_new(&mut self, key: &str, value: V, ttl: Duration, now: Instant) {
        let idx = self.list.push_front(Entry {
            key: key.to_string(),
            value,
            access_time: now,
            ttl,
        });
        self.table.insert(key.to_string(), idx);
    }

    fn check_capacity(&mut self) {
        while (self.list.len() as i64) > self.capacity {
            let Some(tail) = self.list.tail() else {
                break;
            };
            if let Some(entry) = self.list.remove(tail) {
                self.table.remove(&entry.key);
            }
        }
    }
}
