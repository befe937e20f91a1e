// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use gamegate_rs::cache::lru::LruCache;

const NO_TTL: Duration = Duration::ZERO;

#[test]
fn test_set_inserts_value() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set("key", 7u32);
    assert_eq!(cache.get("key"), Some(7));
    assert_eq!(cache.length(), 1);
}

#[test]
fn test_set_with_old_key_updates_value() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set("key", 1u32);
    cache.set("key", 20);
    assert_eq!(cache.get("key"), Some(20));
    assert_eq!(cache.length(), 1);
}

#[test]
fn test_get_non_existent() {
    let cache: LruCache<u32> = LruCache::new(16, NO_TTL);
    assert_eq!(cache.get("crap"), None);
}

#[test]
fn test_delete() {
    let cache = LruCache::new(16, NO_TTL);
    assert!(!cache.delete("key"), "not in cache yet");
    cache.set("key", 1u32);
    assert!(cache.delete("key"));
    assert_eq!(cache.length(), 0);
    assert_eq!(cache.get("key"), None);
    assert!(!cache.delete("key"), "second delete is a miss");
}

#[test]
fn test_clear() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set("a", 1u32);
    cache.set("b", 2);
    cache.clear();
    assert_eq!(cache.length(), 0);
    assert_eq!(cache.get("a"), None);
}

#[test]
fn test_lru_eviction_order() {
    // Capacity 3: set key1..key3, touch key3/key2/key1, then insert key0.
    let cache = LruCache::new(3, NO_TTL);
    cache.set("key1", 1u32);
    cache.set("key2", 2);
    cache.set("key3", 3);
    assert_eq!(cache.get("key3"), Some(3));
    assert_eq!(cache.get("key2"), Some(2));
    assert_eq!(cache.get("key1"), Some(1));

    cache.set("key0", 0);

    // key3 was the least recently used at insert time.
    assert_eq!(cache.get("key3"), None);
    let keys: Vec<_> = cache.items().into_iter().map(|i| i.key).collect();
    assert_eq!(keys, ["key0", "key1", "key2"]);
    assert_eq!(cache.length(), 3);
}

#[test]
fn test_capacity_overflow_evicts_exactly_one() {
    let cache = LruCache::new(4, NO_TTL);
    for i in 0..5 {
        cache.set(&format!("k{i}"), i);
    }
    assert_eq!(cache.length(), 4);
    // k0 was the LRU when k4 arrived; everything else survives.
    assert_eq!(cache.get("k0"), None);
    for i in 1..5 {
        assert_eq!(cache.get(&format!("k{i}")), Some(i));
    }
}

#[test]
fn test_peek_does_not_promote() {
    let cache = LruCache::new(2, NO_TTL);
    cache.set("a", 1u32);
    cache.set("b", 2);
    assert_eq!(cache.peek("a"), Some(1));
    // "a" stayed at the tail, so inserting "c" drops it.
    cache.set("c", 3);
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.get("c"), Some(3));
}

#[test]
fn test_ttl_expiry_and_slot_reuse() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set_with_ttl("key", 1u32, Duration::from_millis(80));
    assert_eq!(cache.get("key"), Some(1));

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(cache.get("key"), None, "expired entries read as misses");
    assert!(!cache.is_existed("key"));

    // The expired tail slot is repurposed by the next insert.
    cache.set_with_ttl("other", 2, Duration::from_millis(500));
    assert_eq!(cache.length(), 1);
    assert_eq!(cache.get("other"), Some(2));
}

#[test]
fn test_set_expiration_zero_means_never() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set_with_ttl("key", 1u32, Duration::from_millis(60));

    // Zero ttl pins the entry past its original deadline.
    cache.set_expiration("key", Duration::ZERO);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cache.get("key"), Some(1));

    // And a short ttl restarts from now.
    cache.set_expiration("key", Duration::from_millis(30));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(cache.get("key"), None);
}

#[test]
fn test_set_expired() {
    let cache = LruCache::new(16, NO_TTL);
    cache.set("key", 1u32);
    assert!(cache.set_expired("key"));
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(cache.get("key"), None);
    assert!(!cache.set_expired("missing"));
}

#[test]
fn test_set_if_absent() {
    let cache = LruCache::new(16, NO_TTL);
    let (value, inserted) = cache.set_if_absent("key", 1u32);
    assert!(inserted);
    assert_eq!(value, 1);

    let (value, inserted) = cache.set_if_absent("key", 2);
    assert!(!inserted, "live entry wins");
    assert_eq!(value, 1);
    assert_eq!(cache.get("key"), Some(1));
}

#[test]
fn test_keys_and_stats() {
    let cache = LruCache::new(8, NO_TTL);
    cache.set("a", 1u32);
    cache.set("b", 2);
    assert_eq!(cache.keys(), ["b", "a"]);

    let stats = cache.stats();
    assert_eq!(stats.length, 2);
    assert_eq!(stats.capacity, 8);
    assert!(stats.oldest_access.is_some());
    assert_eq!(cache.free_size(), 6);
    assert!(cache.stats_json().contains("\"Length\":2"));

    let random = cache.random_items(1);
    assert_eq!(random.len(), 1);
    assert_eq!(cache.random_items(10).len(), 2);
}

#[test]
fn test_shrink_on_set_capacity() {
    let cache = LruCache::new(4, NO_TTL);
    for i in 0..4 {
        cache.set(&format!("k{i}"), i);
    }
    cache.set_capacity(2);
    assert_eq!(cache.length(), 2);
    // Tails went first.
    assert_eq!(cache.get("k0"), None);
    assert_eq!(cache.get("k1"), None);
    assert_eq!(cache.get("k3"), Some(3));
}
