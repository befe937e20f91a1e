// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use gamegate_rs::auth::{nonce::NonceCache, util::generate_nonce};

#[test]
fn test_first_use_accepted_replay_rejected() {
    let cache = NonceCache::new();
    assert!(cache.set_nonce("u1", "n1"));
    assert!(!cache.set_nonce("u1", "n1"));
    assert!(cache.set_nonce("u1", "n2"));
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_users_are_independent() {
    let cache = NonceCache::new();
    assert!(cache.set_nonce("u1", "n1"));
    assert!(cache.set_nonce("u2", "n1"), "same nonce, different user");
    assert_eq!(cache.size(), 2);
}

#[test]
fn test_window_compaction_keeps_recent() {
    let cache = NonceCache::new();
    for i in 1..=20 {
        assert!(cache.set_nonce("u1", &format!("n{i}")));
    }

    // Window is full: n18 is still retained and rejected.
    assert!(!cache.set_nonce("u1", "n18"));

    // The next fresh nonce compacts down to the 3 most recent first.
    assert!(cache.set_nonce("u1", "new"));
    for retained in ["n18", "n19", "n20", "new"] {
        assert!(!cache.set_nonce("u1", retained), "{retained} must be retained");
    }

    // Old nonces fell out of the window and read as fresh again.
    assert!(cache.set_nonce("u1", "n1"));
}

#[test]
fn test_generated_nonces_pass() {
    let cache = NonceCache::new();
    let nonce = generate_nonce();
    assert!(cache.set_nonce("u1", &nonce));
    assert!(!cache.set_nonce("u1", &nonce));
}
