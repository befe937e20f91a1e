// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::cache::mem::MemCache;

/// Lifetime of a user's nonce window, seconds.
const MAX_NONCE_TTL: i64 = 3600;

/// Retained window size; reaching it triggers compaction.
const MAX_NONCE_SIZE: usize = 20;

/// How many of the most recent nonces survive compaction.
const NONCE_KEEP_ON_COMPACT: usize = 3;

/// One user's recent nonces.
#[derive(Debug, Clone, Default)]
pub struct Nonce {
    nonces: Vec<String>,
}

impl Nonce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a nonce; a duplicate within the retained window is
    /// rejected. A full window is compacted in place down to the most
    /// recent few before the new nonce is appended.
    pub fn set(&mut self, nonce: &str) -> bool {
        if self.nonces.iter().any(|v| v == nonce) {
            return false;
        }
        let len = self.nonces.len();
        if len >= MAX_NONCE_SIZE {
            self.nonces.drain(..len - NONCE_KEEP_ON_COMPACT);
        }
        self.nonces.push(nonce.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

/// Per-user nonce windows, each cached for [`MAX_NONCE_TTL`] seconds.
#[derive(Default)]
pub struct NonceCache {
    nonces: MemCache<Nonce>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> i64 {
        self.nonces.len()
    }

    /// Records `nonce` for `user_id`; false means a replay within the
    /// retained window.
    pub fn set_nonce(&self, user_id: &str, nonce: &str) -> bool {
        if let Some(fresh) = self.nonces.with_value(user_id, false, |n, _| n.set(nonce))
        {
            return fresh;
        }
        let mut list = Nonce::new();
        list.set(nonce);
        self.nonces.set(user_id, list, MAX_NONCE_TTL);
        true
    }
}
