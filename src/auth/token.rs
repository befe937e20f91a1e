// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{Local, Timelike};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    auth::util::{generate_game_token, generate_game_token_secret},
    cache::mem::MemCache,
};

/// Token lifetime in seconds.
const MAX_GAME_TOKEN_TTL: i64 = 60 * 60;

/// Verifies arriving closer together than this trip the replay throttle.
const MIN_GAME_TOKEN_ACCESS_TIME: Duration = Duration::from_millis(60);

/// Accepted accesses before the throttle starts measuring.
const TOKEN_ACCESS_WARMUP: u32 = 5;

/// Local-clock hour during which freshly issued tokens are shortened so
/// they all lapse at the same wall-clock boundary.
const DEFAULT_RESET_HOUR: u32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token not exist")]
    NotExist,
    #[error("bad game token, {got} != {want}")]
    BadToken { got: String, want: String },
    #[error("player is kicked out")]
    KickedPlayer,
    #[error("token verify too quick")]
    VerifyTooQuick,
}

/// One user's issued token.
#[derive(Debug, Clone)]
pub struct GameToken {
    dev_id: String,
    token: String,
    token_secret: String,
    access_count: u32,
    kicked: bool,
}

impl GameToken {
    fn new(dev_id: &str) -> Self {
        Self {
            dev_id: dev_id.to_string(),
            token: generate_game_token(),
            token_secret: generate_game_token_secret(),
            access_count: 0,
            kicked: false,
        }
    }
}

/// Called for each key the sweeper sees about to lapse; may re-issue or
/// delete through the cache handle it is given.
pub type ExpiredCallback = Arc<dyn Fn(&str, &GameTokenCache) + Send + Sync>;

/// Game-token cache keyed by user id.
pub struct GameTokenCache {
    tokens: MemCache<GameToken>,
    reset_hour: u32,
    expired_cb: Mutex<Option<(Duration, ExpiredCallback)>>,
}

impl Default for GameTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GameTokenCache {
    pub fn new() -> Self {
        Self::with_reset_hour(DEFAULT_RESET_HOUR)
    }

    pub fn with_reset_hour(reset_hour: u32) -> Self {
        Self {
            tokens: MemCache::new(),
            reset_hour,
            expired_cb: Mutex::new(None),
        }
    }

    pub fn size(&self) -> i64 {
        self.tokens.len()
    }

    /// Issues a fresh token and secret for the user, replacing any prior
    /// one. Inside the reset hour, the ttl is cut so every token issued
    /// that hour expires at the next full hour.
    pub fn set_token(&self, user_id: &str, dev_id: &str) -> (String, String) {
        let mut ttl = MAX_GAME_TOKEN_TTL;
        let now = Local::now();
        if now.hour() == self.reset_hour {
            ttl = MAX_GAME_TOKEN_TTL - i64::from(now.minute() * 60 + now.second());
        }
        let tk = GameToken::new(dev_id);
        let pair = (tk.token.clone(), tk.token_secret.clone());
        self.tokens.set(user_id, tk, ttl);
        pair
    }

    /// Returns `(dev_id, token, token_secret)`; kicked users read as
    /// kicked rather than missing.
    pub fn get_token(
        &self,
        user_id: &str,
    ) -> Result<(String, String, String), TokenError> {
        self.tokens
            .with_value(user_id, false, |t, _| {
                if t.kicked {
                    Err(TokenError::KickedPlayer)
                } else {
                    Ok((t.dev_id.clone(), t.token.clone(), t.token_secret.clone()))
                }
            })
            .unwrap_or(Err(TokenError::NotExist))
    }

    /// Checks a presented token and returns its secret. After the warmup
    /// accesses, verifies landing under the minimum inter-access delta
    /// are rejected to slow replay-speed brute force.
    pub fn verify(&self, user_id: &str, token: &str) -> Result<String, TokenError> {
        self.tokens
            .with_value(user_id, true, |t, delta| {
                if t.kicked {
                    return Err(TokenError::KickedPlayer);
                }
                if token != t.token {
                    return Err(TokenError::BadToken {
                        got: token.to_string(),
                        want: t.token.clone(),
                    });
                }
                t.access_count += 1;
                if t.access_count > TOKEN_ACCESS_WARMUP
                    && delta < MIN_GAME_TOKEN_ACCESS_TIME
                {
                    error!(
                        user_id,
                        delta_ms = delta.as_millis() as u64,
                        "verify token too quick"
                    );
                    return Err(TokenError::VerifyTooQuick);
                }
                Ok(t.token_secret.clone())
            })
            .unwrap_or(Err(TokenError::NotExist))
    }

    /// Marks the user kicked; the entry stays cached until it expires but
    /// every lookup now fails. Reports whether a live token was found.
    pub fn kick_out(&self, user_id: &str) -> bool {
        self.tokens
            .with_value(user_id, false, |t, _| {
                t.kicked = true;
                true
            })
            .unwrap_or(false)
    }

    pub fn del_token(&self, user_id: &str) {
        self.tokens.delete(user_id);
    }

    /// Expires the token without removing it.
    pub fn set_token_expired(&self, user_id: &str) {
        self.set_token_ttl(user_id, 0);
    }

    pub fn set_token_ttl(&self, user_id: &str, ttl: i64) {
        self.tokens.set_expiration(user_id, ttl);
    }

    /// Registers the periodic expiry sweep: every `interval / 2`, keys
    /// whose deadline falls within the next `interval` are reported to
    /// `cb`.
    pub fn set_expired_callback(&self, interval: Duration, cb: ExpiredCallback) {
        let mut slot = self.expired_cb.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((interval, cb));
    }

    /// One sweep pass; returns the delay until the next one, or `None`
    /// when no callback is registered.
    pub fn sweep_expired(&self) -> Option<Duration> {
        let (interval, cb) = {
            let slot = self.expired_cb.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone()?
        };
        for user_id in self.tokens.expired_keys(interval) {
            cb(&user_id, self);
        }
        Some(interval / 2)
    }

    /// Runs the sweep in its own task until `shutdown` fires or the
    /// callback is unregistered.
    pub fn start_expired_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let Some(delay) = cache.sweep_expired() else {
                    return;
                };
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {},
                }
            }
        });
    }
}
