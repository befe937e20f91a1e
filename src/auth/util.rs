// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rand::RngExt;
use sha1::{Digest, Sha1};

fn make_random_bytes(size: usize) -> Vec<u8> {
    let mut b = vec![0u8; size];
    rand::rng().fill(&mut b[..]);
    b
}

fn make_random_string() -> String {
    hex::encode(make_random_bytes(16))
}

fn salted_sha1_hex(salt: &str) -> String {
    let mut h = Sha1::new();
    h.update(make_random_string());
    h.update(salt);
    hex::encode(h.finalize())
}

/// Generates a single-use nonce string.
pub fn generate_nonce() -> String {
    hex::encode(make_random_bytes(20))
}

/// Generates a fresh game token.
pub fn generate_game_token() -> String {
    salted_sha1_hex("game_token_salt")
}

/// Generates the secret paired with a game token.
pub fn generate_game_token_secret() -> String {
    salted_sha1_hex("game_token_secret_salt")
}
