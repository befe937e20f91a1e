// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::sleep;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error};

use crate::{
    net::conn::{BaseConn, NetStream},
    packet::{buffer::PacketBuffer, game::GamePacket},
    tunnel::{frontend::FrontendSession, pool::SessionPool},
};

/// Liveness window in seconds: pings go out every `MIN_PING_TIME - 2`,
/// and a link that saw no ping for `MIN_PING_TIME` is declared dead.
pub const MIN_PING_TIME: i64 = 20;

const CONN_TIMEOUT: Duration = Duration::from_secs(10);

/// Frontend session ids start above this so id 0 stays a sentinel.
const FRONTEND_ID_BASE: u32 = 100;

/// One inbound frame from the peer server, held in a pooled buffer.
pub struct BackendRequest {
    buffer: PacketBuffer,
}

impl BackendRequest {
    pub fn new(pool: &SessionPool) -> Self {
        Self {
            buffer: pool.new_packet_buffer(),
        }
    }

    pub async fn read(&mut self, conn: &BaseConn) -> Result<()> {
        conn.read_packet(&mut self.buffer).await
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.bytes_mut()
    }

    pub fn free(&mut self) {
        self.buffer.free();
    }
}

/// Reconnect pacing for one backend host.
///
/// Consecutive failed dials space out along the fixed seconds table; a
/// successful dial resets the run.
#[derive(Debug, Default)]
pub struct BackendConnState {
    total_try_num: u32,
    last_try_time: i64,
}

const MIN_SECONDS_FOR_TRY_CONNECT: [u8; 8] = [1, 1, 2, 2, 2, 4, 4, 8];

impl BackendConnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.total_try_num = 0;
        self.last_try_time = 0;
    }

    pub fn total_try_num(&self) -> u32 {
        self.total_try_num
    }

    fn min_try_interval(&self) -> i64 {
        i64::from(MIN_SECONDS_FOR_TRY_CONNECT[(self.total_try_num & 0x07) as usize])
    }

    /// Whether enough wall time elapsed since the last attempt; a granted
    /// attempt is recorded immediately.
    pub fn try_again(&mut self) -> bool {
        self.try_again_at(Utc::now().timestamp())
    }

    pub fn try_again_at(&mut self, now: i64) -> bool {
        let ok = now - self.last_try_time >= self.min_try_interval();
        if ok {
            self.total_try_num += 1;
            self.last_try_time = now;
        }
        ok
    }
}

/// Long-lived inter-server link multiplexing many frontend sessions.
///
/// Three tasks share it once established: the reader loop (driven by the
/// manager or the serving side), the pinger and the liveness checker.
pub struct BackendSession {
    id: u32,
    conn: Arc<BaseConn>,
    closed: AtomicBool,
    sig_close: CancellationToken,
    ping_time: AtomicI64,
    frontends: DashMap<u32, Arc<FrontendSession>>,
    id_counter: AtomicU32,
    requests: TaskTracker,
    pool: Arc<SessionPool>,
}

impl BackendSession {
    pub fn new(id: u32, stream: NetStream, pool: &Arc<SessionPool>) -> Arc<Self> {
        let conn = BaseConn::new(stream, pool.readers(), None, None);
        Self::with_conn(id, conn, pool)
    }

    /// Serving-side constructor: keeps the accept permit and the
    /// listener's read-synced token attached to the link.
    pub fn from_service_conn(
        id: u32,
        conn: crate::net::server::ServiceConn,
        pool: &Arc<SessionPool>,
    ) -> Arc<Self> {
        let base = BaseConn::new(
            conn.stream,
            pool.readers(),
            conn.read_synced.as_ref(),
            conn.permit,
        );
        Self::with_conn(id, base, pool)
    }

    fn with_conn(id: u32, conn: Arc<BaseConn>, pool: &Arc<SessionPool>) -> Arc<Self> {
        conn.set_timeout(CONN_TIMEOUT);
        Arc::new(Self {
            id,
            conn,
            closed: AtomicBool::new(false),
            sig_close: CancellationToken::new(),
            ping_time: AtomicI64::new(Utc::now().timestamp()),
            frontends: DashMap::new(),
            id_counter: AtomicU32::new(0),
            requests: TaskTracker::new(),
            pool: Arc::clone(pool),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn client_addr(&self) -> &str {
        self.conn.peer_addr()
    }

    pub fn local_addr(&self) -> &str {
        self.conn.local_addr()
    }

    /// Reads the next frame off the link.
    pub async fn read_request(&self) -> Result<BackendRequest> {
        let mut req = BackendRequest::new(&self.pool);
        req.read(&self.conn).await?;
        Ok(req)
    }

    pub async fn write(&self, b: &[u8]) -> Result<()> {
        self.conn.write_all(b).await
    }

    /// Announces our server id to the peer right after dialing.
    pub async fn register(&self, sid: u32) -> Result<()> {
        self.write(GamePacket::register(sid).as_bytes()).await
    }

    /// Runs a dispatched request under the session's in-flight tracker;
    /// the session does not count as drained until they all finish.
    pub fn spawn_request<F>(&self, fut: F)
    where F: Future<Output = ()> + Send + 'static {
        self.requests.spawn(fut);
    }

    /// Waits for every in-flight request to complete.
    pub async fn wait_requests_done(&self) {
        self.requests.close();
        self.requests.wait().await;
    }

    pub fn update_ping(&self) {
        self.ping_time.store(Utc::now().timestamp(), Ordering::Release);
    }

    pub fn last_ping(&self) -> i64 {
        self.ping_time.load(Ordering::Acquire)
    }

    /// Sends keep-alives until the link closes; a failed send closes the
    /// connection and ends the task.
    pub fn start_ping(self: &Arc<Self>) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs((MIN_PING_TIME - 2) as u64);
            let ping = GamePacket::ping();
            loop {
                tokio::select! {
                    _ = sess.sig_close.cancelled() => return,
                    _ = sleep(period) => {},
                }
                debug!(
                    backend = sess.id,
                    addr = %sess.client_addr(),
                    "ping"
                );
                if let Err(err) = sess.conn.write_all(ping.as_bytes()).await {
                    error!(
                        backend = sess.id,
                        addr = %sess.client_addr(),
                        "ping failed: {:#}", err
                    );
                    sess.conn.close().await;
                    return;
                }
            }
        });
    }

    /// Declares the link dead when no ping arrived within the liveness
    /// window.
    pub fn start_check_ping(self: &Arc<Self>) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs(MIN_PING_TIME as u64);
            loop {
                tokio::select! {
                    _ = sess.sig_close.cancelled() => return,
                    _ = sleep(period) => {},
                }
                if Utc::now().timestamp() - sess.last_ping() > MIN_PING_TIME {
                    error!(
                        backend = sess.id,
                        addr = %sess.client_addr(),
                        "ping timeout"
                    );
                    sess.conn.close().await;
                    return;
                }
            }
        });
    }

    /// Allocates a frontend session id; always above the base so 0 keeps
    /// meaning "unbound".
    pub fn new_frontend_session_id(&self) -> u32 {
        FRONTEND_ID_BASE + self.id_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get_frontend_session(&self, id: u32) -> Option<Arc<FrontendSession>> {
        self.frontends.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn add_frontend_session(&self, sess: Arc<FrontendSession>) {
        self.frontends.insert(sess.id(), sess);
    }

    pub fn del_frontend_session(&self, id: u32) {
        self.frontends.remove(&id);
    }

    /// One-shot close: signals every session task, closes all bound
    /// frontends, then the link itself.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.sig_close.cancel();
        let frontends: Vec<_> = self
            .frontends
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        self.frontends.clear();
        for frontend in frontends {
            frontend.close().await;
        }
        self.conn.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
