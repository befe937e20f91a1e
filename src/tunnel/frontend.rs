// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    net::{conn::BaseConn, server::ServiceConn},
    packet::buffer::PacketBuffer,
    tunnel::{backend::BackendSession, pool::SessionPool},
};

/// How long a frontend blocks for its tunnelled response.
const RESPONSE_WAIT_TIME: Duration = Duration::from_secs(10);

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-client stateful session.
///
/// Lives for a single request/response exchange: created on accept,
/// optionally bound to one backend session for forwarding (id 0 means
/// unbound), closed when the response completes or the client goes away.
pub struct FrontendSession {
    id: AtomicU32,
    conn: Arc<BaseConn>,
    buffer: tokio::sync::Mutex<PacketBuffer>,
    closed: AtomicBool,
    done: CancellationToken,
    backend: Mutex<Option<Weak<BackendSession>>>,
}

impl FrontendSession {
    pub fn new(conn: ServiceConn, pool: &SessionPool) -> Arc<Self> {
        let base = BaseConn::new(
            conn.stream,
            pool.readers(),
            conn.read_synced.as_ref(),
            conn.permit,
        );
        base.set_read_timeout(READ_TIMEOUT);
        Arc::new(Self {
            id: AtomicU32::new(0),
            conn: base,
            buffer: tokio::sync::Mutex::new(pool.new_packet_buffer()),
            closed: AtomicBool::new(false),
            done: CancellationToken::new(),
            backend: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn client_addr(&self) -> &str {
        self.conn.peer_addr()
    }

    /// Reads one complete packet into the session buffer and hands the
    /// buffer guard back for in-place processing.
    pub async fn read_packet(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, PacketBuffer>> {
        let mut buf = self.buffer.lock().await;
        self.conn.read_packet(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write(&self, b: &[u8]) -> Result<()> {
        self.conn.write_all(b).await
    }

    /// Idempotent close; frees the read buffer back to its pool.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.conn.close().await;
        self.buffer.lock().await.free();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Binds this session to a backend: draws a non-zero session id from
    /// the backend's allocator and registers in its frontend table. A
    /// second bind is a no-op.
    pub fn bind_backend_session(self: &Arc<Self>, backend: &Arc<BackendSession>) {
        let mut slot = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let id = backend.new_frontend_session_id();
        self.id.store(id, Ordering::Release);
        *slot = Some(Arc::downgrade(backend));
        backend.add_frontend_session(Arc::clone(self));
    }

    pub fn unbind_backend_session(&self) {
        let backend = {
            let mut slot = self.backend.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(backend) = backend.and_then(|weak| weak.upgrade()) {
            backend.del_frontend_session(self.id());
        }
        self.id.store(0, Ordering::Release);
    }

    /// Blocks until the backend reply loop signals completion, bounded by
    /// the response window.
    pub async fn wait_response(&self) {
        tokio::select! {
            _ = self.done.cancelled() => {},
            _ = tokio::time::sleep(RESPONSE_WAIT_TIME) => {
                error!(
                    client = self.id(),
                    addr = %self.client_addr(),
                    "response timeout"
                );
            },
        }
    }

    /// Marks the response as delivered, waking `wait_response`.
    pub fn done_response(&self) {
        self.done.cancel();
    }
}
