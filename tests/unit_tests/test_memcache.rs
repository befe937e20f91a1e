// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use gamegate_rs::cache::mem::MemCache;
use serial_test::serial;

#[test]
fn test_set_and_get() {
    let cache = MemCache::new();
    cache.set("key", 10u32, 0);
    let (value, delta) = cache.get("key", false).expect("hit");
    assert_eq!(value, 10);
    assert_eq!(delta, Duration::ZERO);
    assert!(cache.is_existed("key"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_get_missing() {
    let cache: MemCache<u32> = MemCache::new();
    assert!(cache.get("crap", false).is_none());
    assert!(!cache.is_existed("crap"));
}

#[test]
fn test_update_keeps_one_entry() {
    let cache = MemCache::new();
    cache.set("key", 1u32, 0);
    cache.set("key", 2, 0);
    assert_eq!(cache.get("key", false).map(|(v, _)| v), Some(2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_access_delta_reported() {
    let cache = MemCache::new();
    cache.set("key", 1u32, 0);

    // First accessed read measures since insert.
    let (_, _) = cache.get("key", true).expect("hit");
    std::thread::sleep(Duration::from_millis(80));
    let (_, delta) = cache.get("key", true).expect("hit");
    assert!(delta >= Duration::from_millis(80), "delta was {delta:?}");

    // Unaccessed reads leave the stamp alone and report zero.
    let (_, delta) = cache.get("key", false).expect("hit");
    assert_eq!(delta, Duration::ZERO);
}

#[test]
fn test_with_value_mutates_under_lock() {
    let cache = MemCache::new();
    cache.set("key", 0u32, 0);
    for _ in 0..3 {
        cache.with_value("key", false, |v, _| *v += 1);
    }
    assert_eq!(cache.get("key", false).map(|(v, _)| v), Some(3));
}

#[test]
#[serial]
fn test_ttl_expiry_and_tail_reuse() {
    let cache = MemCache::new();
    cache.set("key", 1u32, 1);
    assert!(cache.get("key", false).is_some());

    std::thread::sleep(Duration::from_millis(1100));
    assert!(cache.get("key", false).is_none(), "expired reads as a miss");

    // The expired tail is repurposed, not reallocated.
    cache.set("other", 2, 60);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("other", false).map(|(v, _)| v), Some(2));
}

#[test]
#[serial]
fn test_set_expiration_conventions() {
    let cache = MemCache::new();

    // ttl = 0 expires at once.
    cache.set("now", 1u32, 60);
    cache.set_expiration("now", 0);
    assert!(cache.get("now", false).is_none());

    // ttl < 0 pins the entry forever.
    cache.set("pinned", 2u32, 1);
    cache.set_expiration("pinned", -1);
    std::thread::sleep(Duration::from_millis(1100));
    assert!(cache.get("pinned", false).is_some());

    // Unknown keys are ignored.
    cache.set_expiration("missing", 10);
}

#[test]
fn test_delete_and_clear() {
    let cache = MemCache::new();
    assert!(!cache.delete("key"));
    cache.set("key", 1u32, 0);
    assert!(cache.delete("key"));
    assert_eq!(cache.len(), 0);

    cache.set("a", 1, 0);
    cache.set("b", 2, 0);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_expired_keys_window() {
    let cache = MemCache::new();
    cache.set("soon", 1u32, 1);
    cache.set("later", 2, 3600);
    cache.set("never", 3, 0);

    let keys = cache.expired_keys(Duration::from_secs(5));
    assert_eq!(keys, ["soon"]);

    // Entries are reported, never removed.
    assert_eq!(cache.len(), 3);

    let all_soon = cache.expired_keys(Duration::from_secs(7200));
    assert!(all_soon.contains(&"soon".to_string()));
    assert!(all_soon.contains(&"later".to_string()));
    assert!(!all_soon.contains(&"never".to_string()));
}
