// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use gamegate_rs::auth::token::{GameTokenCache, TokenError};
use serial_test::serial;

#[test]
fn test_set_and_get_token() {
    let cache = GameTokenCache::new();
    let (token, secret) = cache.set_token("u1", "dev-1");
    assert_eq!(token.len(), 40);
    assert_eq!(secret.len(), 40);
    assert_eq!(cache.size(), 1);

    let (dev_id, got_token, got_secret) = cache.get_token("u1").expect("token");
    assert_eq!(dev_id, "dev-1");
    assert_eq!(got_token, token);
    assert_eq!(got_secret, secret);
}

#[test]
fn test_set_token_overwrites() {
    let cache = GameTokenCache::new();
    let (first, _) = cache.set_token("u1", "dev-1");
    let (second, _) = cache.set_token("u1", "dev-2");
    assert_ne!(first, second);
    assert_eq!(cache.size(), 1);

    let (dev_id, token, _) = cache.get_token("u1").expect("token");
    assert_eq!(dev_id, "dev-2");
    assert_eq!(token, second);
}

#[test]
fn test_get_missing_token() {
    let cache = GameTokenCache::new();
    assert_eq!(cache.get_token("nobody"), Err(TokenError::NotExist));
    assert_eq!(
        cache.verify("nobody", "whatever"),
        Err(TokenError::NotExist)
    );
}

#[test]
fn test_verify_bad_token() {
    let cache = GameTokenCache::new();
    cache.set_token("u1", "dev-1");
    assert!(matches!(
        cache.verify("u1", "not-the-token"),
        Err(TokenError::BadToken { .. })
    ));
}

#[test]
#[serial]
fn test_verify_replay_throttle() {
    let cache = GameTokenCache::new();
    let (token, secret) = cache.set_token("u1", "dev-1");

    // Five verifies spaced over the minimum delta all pass.
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.verify("u1", &token), Ok(secret.clone()));
    }

    // The sixth is still properly spaced and passes.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cache.verify("u1", &token), Ok(secret.clone()));

    // The seventh lands immediately after and trips the throttle.
    assert_eq!(cache.verify("u1", &token), Err(TokenError::VerifyTooQuick));
}

#[test]
fn test_kick_out() {
    let cache = GameTokenCache::new();
    let (token, _) = cache.set_token("u1", "dev-1");
    assert!(cache.get_token("u1").is_ok());

    assert!(cache.kick_out("u1"));
    assert_eq!(cache.get_token("u1"), Err(TokenError::KickedPlayer));
    assert_eq!(cache.verify("u1", &token), Err(TokenError::KickedPlayer));

    assert!(!cache.kick_out("nobody"));
}

#[test]
fn test_del_token() {
    let cache = GameTokenCache::new();
    cache.set_token("u1", "dev-1");
    cache.del_token("u1");
    assert_eq!(cache.get_token("u1"), Err(TokenError::NotExist));
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_set_token_expired() {
    let cache = GameTokenCache::new();
    cache.set_token("u1", "dev-1");
    cache.set_token_expired("u1");
    assert_eq!(cache.get_token("u1"), Err(TokenError::NotExist));
}

#[test]
fn test_set_token_ttl_pins_entry() {
    let cache = GameTokenCache::new();
    cache.set_token("u1", "dev-1");
    cache.set_token_ttl("u1", -1);
    assert!(cache.get_token("u1").is_ok());
}

#[test]
fn test_expired_sweep_reports_lapsing_keys() {
    // An out-of-range reset hour keeps issued ttls at the full hour
    // regardless of when the test runs.
    let cache = GameTokenCache::with_reset_hour(25);
    cache.set_token("u1", "dev-1");
    cache.set_token("u2", "dev-2");
    // u1 lapses within the sweep window, u2 only much later.
    cache.set_token_ttl("u1", 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    cache.set_expired_callback(
        Duration::from_secs(10),
        Arc::new(move |user_id, _cache| {
            seen_cb
                .lock()
                .expect("seen lock")
                .push(user_id.to_string());
        }),
    );

    let next = cache.sweep_expired().expect("callback registered");
    assert_eq!(next, Duration::from_secs(5));
    let seen = seen.lock().expect("seen lock");
    assert_eq!(&*seen, &["u1".to_string()]);
}

#[test]
fn test_sweep_without_callback() {
    let cache = GameTokenCache::new();
    assert!(cache.sweep_expired().is_none());
}
