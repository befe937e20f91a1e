// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::net::{conn::NetStream, server::NetListener};

/// Listener accepting at most `n` simultaneous connections.
///
/// `accept` blocks on the counting semaphore; a close wakes pending
/// acquirers and makes further accepts fail without blocking. The permit
/// travels with the accepted stream and is released exactly once when the
/// owning connection closes (permit drop).
pub struct LimitListener {
    inner: NetListener,
    sem: Arc<Semaphore>,
    done: CancellationToken,
}

impl LimitListener {
    pub fn new(inner: NetListener, n: usize) -> Self {
        Self {
            inner,
            sem: Arc::new(Semaphore::new(n)),
            done: CancellationToken::new(),
        }
    }

    pub async fn accept(&self) -> Result<(NetStream, OwnedSemaphorePermit)> {
        let permit = tokio::select! {
            _ = self.done.cancelled() => bail!("listener closed"),
            permit = Arc::clone(&self.sem).acquire_owned() => permit?,
        };
        let stream = tokio::select! {
            _ = self.done.cancelled() => bail!("listener closed"),
            res = self.inner.accept() => res?,
        };
        Ok((stream, permit))
    }

    /// Closes the `done` signal; pending and future acquires abort.
    pub fn close(&self) {
        self.done.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Permits currently available, for observability.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}
