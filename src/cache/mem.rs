// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TTL-only cache with access-delta reporting.
//!
//! No capacity bound: entries leave by deletion or expiry. Expiry is an
//! absolute unix deadline (0 = never), so a sweeper can enumerate keys
//! about to lapse. Reads do not reorder the list; inserts move entries to
//! the front and may repurpose an expired tail instead of allocating.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::cache::arena::LinkedArena;

struct Entry<V> {
    key: String,
    value: V,
    /// Unix seconds; 0 means the entry never expires.
    expire_time: i64,
    access_time: Instant,
}

impl<V> Entry<V> {
    fn expired(&self, now_unix: i64) -> bool {
        self.expire_time > 0 && now_unix >= self.expire_time
    }
}

struct Inner<V> {
    list: LinkedArena<Entry<V>>,
    table: HashMap<String, usize>,
}

pub struct MemCache<V> {
    inner: Mutex<Inner<V>>,
}

impl<V> Default for MemCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                list: LinkedArena::new(),
                table: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks a value up; expired entries read as misses. With `accessed`
    /// set, returns the time since the previous access and refreshes the
    /// access stamp — the replay throttle feeds on that delta.
    pub fn get(&self, key: &str, accessed: bool) -> Option<(V, Duration)>
    where V: Clone {
        self.with_value(key, accessed, |value, delta| (value.clone(), delta))
    }

    /// Same lookup contract as [`MemCache::get`], but hands the caller a
    /// mutable borrow of the value under the cache lock, so compound
    /// updates (access counters, kick markers) stay atomic with the
    /// lookup.
    pub fn with_value<R>(
        &self,
        key: &str,
        accessed: bool,
        f: impl FnOnce(&mut V, Duration) -> R,
    ) -> Option<R> {
        let mut inner = self.lock();
        let idx = *inner.table.get(key)?;
        let now_unix = Utc::now().timestamp();
        let entry = inner.list.value_mut(idx)?;
        if entry.expired(now_unix) {
            return None;
        }
        let mut delta = Duration::ZERO;
        if accessed {
            let now = Instant::now();
            delta = now.duration_since(entry.access_time);
            entry.access_time = now;
        }
        Some(f(&mut entry.value, delta))
    }

    pub fn is_existed(&self, key: &str) -> bool {
        let inner = self.lock();
        inner
            .table
            .get(key)
            .and_then(|&idx| inner.list.value(idx))
            .is_some_and(|e| !e.expired(Utc::now().timestamp()))
    }

    /// Inserts or replaces; `ttl` in seconds, `<= 0` meaning no expiry.
    pub fn set(&self, key: &str, value: V, ttl: i64) {
        let mut inner = self.lock();
        inner.set(key, value, ttl);
    }

    /// Adjusts an existing entry's deadline:
    /// `ttl < 0` never expires, `ttl == 0` expires at once, `ttl > 0`
    /// expires `ttl` seconds from now.
    pub fn set_expiration(&self, key: &str, ttl: i64) {
        let mut inner = self.lock();
        let Some(&idx) = inner.table.get(key) else {
            return;
        };
        if let Some(entry) = inner.list.value_mut(idx) {
            entry.expire_time = if ttl >= 0 {
                Utc::now().timestamp() + ttl
            } else {
                0
            };
        }
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

    pub fn len(&self) -> i64 {
        self.lock().list.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys whose deadline falls within `now + lookahead`, collected by
    /// walking the list tail-first so the stalest entries come out first.
    /// Entries are left in place; callers decide their fate.
    pub fn expired_keys(&self, lookahead: Duration) -> Vec<String> {
        let inner = self.lock();
        let horizon = Utc::now().timestamp() + lookahead.as_secs() as i64;
        let mut keys = Vec::new();
        let mut cursor = inner.list.tail();
        while let Some(idx) = cursor {
            if let Some(entry) = inner.list.value(idx)
                && entry.expired(horizon)
            {
                keys.push(entry.key.clone());
            }
            cursor = inner.list.prev(idx);
        }
        keys
    }
}

impl<V> Inner<V> {
    fn set(&mut self, key: &str, value: V, ttl: i64) {
        let now_unix = Utc::now().timestamp();
        if let Some(&idx) = self.table.get(key) {
            if let Some(entry) = self.list.value_mut(idx) {
                entry.value = value;
                entry.expire_time = if ttl > 0 { now_unix + ttl } else { 0 };
            }
            self.list.move_to_front(idx);
            return;
        }

        // Only entries that can expire may repurpose an expired tail; a
        // never-expiring insert always takes a fresh node.
        if ttl > 0
            && let Some(tail) = self.list.tail()
            && self.list.value(tail).is_some_and(|e| e.expired(now_unix))
        {
            if let Some(old_key) = self.list.value(tail).map(|e| e.key.clone()) {
                self.table.remove(&old_key);
            }
            if let Some(entry) = self.list.value_mut(tail) {
                entry.key = key.to_string();
                entry.value = value;
                entry.expire_time = now_unix + ttl;
                entry.access_time = Instant::now();
            }
            self.table.insert(key.to_string(), tail);
            self.list.move_to_front(tail);
            return;
        }

        let idx = self.list.push_front(Entry {
            key: key.to_string(),
            value,
            expire_time: if ttl > 0 { now_unix + ttl } else { 0 },
            access_time: Instant::now(),
        });
        self.table.insert(key.to_string(), idx);
    }
}
