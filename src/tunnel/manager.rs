// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicI32, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    net::conn::NetStream,
    packet::{XOR_KEY, game::GamePacket},
    tunnel::{
        backend::{BackendConnState, BackendRequest, BackendSession},
        pool::SessionPool,
    },
    utils::is_net_timeout,
};

const SERVICE_ON: i32 = 0;
const SERVICE_OFF: i32 = 1;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts `try_get_session` makes before giving up.
const MAX_GET_SESSION_TRIES: u32 = 5;

const DIAL_QUEUE_DEPTH: usize = 64;

/// Pluggable id → host fallback consulted when the internal table has no
/// entry (a discovery service in production).
pub trait HostRegistry: Send + Sync {
    fn lookup(&self, id: u32) -> Option<String>;
}

struct HostItem {
    id: u32,
    host: String,
}

/// Owns every outbound inter-server link: sessions by server id,
/// per-host reconnect pacing, and the buffered dial queue consumed by a
/// single dialer task.
pub struct BackendSessionMgr {
    sessions: DashMap<u32, Arc<BackendSession>>,
    service_state: AtomicI32,
    conn_states: DashMap<String, BackendConnState>,
    hosts: RwLock<HashMap<u32, String>>,
    registry: Option<Arc<dyn HostRegistry>>,
    dial_tx: mpsc::Sender<HostItem>,
    dial_rx: Mutex<Option<mpsc::Receiver<HostItem>>>,
    /// Our server id, announced to freshly dialed peers; 0 skips the
    /// announcement.
    self_id: AtomicU32,
    pool: Arc<SessionPool>,
}

impl BackendSessionMgr {
    pub fn new(pool: Arc<SessionPool>, registry: Option<Arc<dyn HostRegistry>>) -> Arc<Self> {
        let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE_DEPTH);
        Arc::new(Self {
            sessions: DashMap::new(),
            service_state: AtomicI32::new(SERVICE_ON),
            conn_states: DashMap::new(),
            hosts: RwLock::new(HashMap::new()),
            registry,
            dial_tx,
            dial_rx: Mutex::new(Some(dial_rx)),
            self_id: AtomicU32::new(0),
            pool,
        })
    }

    pub fn set_self_id(&self, sid: u32) {
        self.self_id.store(sid, Ordering::Release);
    }

    /// Replaces the internal id → host table.
    pub fn set_hosts(&self, hosts: HashMap<u32, String>) {
        *self.hosts.write().unwrap_or_else(|e| e.into_inner()) = hosts;
    }

    pub fn set_host(&self, id: u32, host: String) {
        self.hosts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, host);
    }

    pub fn get_service_state(&self) -> i32 {
        self.service_state.load(Ordering::Acquire)
    }

    pub fn set_service_state(&self, state: i32) {
        self.service_state.store(state, Ordering::Release);
    }

    pub fn set_service_on(&self) {
        self.set_service_state(SERVICE_ON);
    }

    pub fn set_service_off(&self) {
        self.set_service_state(SERVICE_OFF);
    }

    /// Admission gate: forwarding paths must check before dispatching.
    pub fn is_service_off(&self) -> bool {
        self.get_service_state() == SERVICE_OFF
    }

    pub fn get_session(&self, id: u32) -> Option<Arc<BackendSession>> {
        self.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn add_session(&self, sess: &Arc<BackendSession>) {
        if sess.id() > 0 {
            self.sessions.insert(sess.id(), Arc::clone(sess));
        } else {
            error!("cannot add a backend session, id == 0");
        }
    }

    /// Drops a session and the reconnect state of its host.
    pub fn del_session(&self, id: u32) {
        if id == 0 {
            error!("cannot del a backend session, id == 0");
            return;
        }
        if let Some((_, sess)) = self.sessions.remove(&id) {
            self.conn_states.remove(sess.client_addr());
        }
    }

    /// Returns a live session for `id`, requesting reconnects and backing
    /// off `100 ms << try` between attempts. `None` means the id is
    /// unknown or the backend stayed unreachable.
    pub async fn try_get_session(self: &Arc<Self>, id: u32) -> Option<Arc<BackendSession>> {
        for trys in 0..MAX_GET_SESSION_TRIES {
            if let Some(sess) = self.get_session(id) {
                return Some(sess);
            }
            if !self.connect_sid_again(id) {
                return None;
            }
            sleep(Duration::from_millis(100) * (1u32 << trys)).await;
        }
        None
    }

    /// Dials `host` and installs the session; the caller owns follow-up
    /// (register + reply loop) unless it goes through the dial queue.
    pub async fn new_session(
        self: &Arc<Self>,
        id: u32,
        host: &str,
    ) -> Result<Arc<BackendSession>> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(host))
            .await
            .with_context(|| format!("dial backend-{id}@{host} timeout"))?
            .with_context(|| format!("dial backend-{id}@{host}"))?;
        stream.set_nodelay(true)?;
        let sess = BackendSession::new(id, NetStream::Tcp(stream), &self.pool);
        self.add_session(&sess);
        Ok(sess)
    }

    /// Starts the dialer task draining the buffered host queue.
    pub fn start_connect_hosts(self: &Arc<Self>, shutdown: CancellationToken) {
        let Some(mut rx) = self
            .dial_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => return,
                    },
                };
                mgr.dial_backend(item).await;
            }
        });
    }

    fn get_one_host(&self, id: u32) -> Option<String> {
        let from_table = {
            let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
            hosts.get(&id).cloned()
        };
        from_table.or_else(|| self.registry.as_ref()?.lookup(id))
    }

    /// Queues a reconnect for `id` if its host is known. The enqueue is
    /// non-blocking: a full queue just drops the hint, a later caller
    /// will retry.
    fn connect_sid_again(&self, id: u32) -> bool {
        let Some(host) = self.get_one_host(id) else {
            error!(backend = id, "cannot find the host for backend");
            return false;
        };
        if self.get_session(id).is_none() {
            let _ = self.dial_tx.try_send(HostItem { id, host });
        }
        true
    }

    async fn dial_backend(self: &Arc<Self>, item: HostItem) {
        if self.get_session(item.id).is_some() {
            return;
        }
        let allowed = {
            let mut state = self
                .conn_states
                .entry(item.host.clone())
                .or_insert_with(BackendConnState::new);
            state.try_again()
        };
        if !allowed {
            return;
        }
        match self.new_session(item.id, &item.host).await {
            Ok(sess) => {
                if let Some(mut state) = self.conn_states.get_mut(&item.host) {
                    state.reset();
                }
                info!(
                    backend = item.id,
                    host = %item.host,
                    "connected backend link"
                );
                let sid = self.self_id.load(Ordering::Acquire);
                if sid > 0
                    && let Err(err) = sess.register(sid).await
                {
                    error!(backend = item.id, "register failed: {:#}", err);
                }
                let mgr = Arc::clone(self);
                tokio::spawn(async move {
                    handle_backend_response(mgr, sess).await;
                });
            },
            Err(err) => {
                error!(backend = item.id, host = %item.host, "{:#}", err);
            },
        }
    }
}

/// Reply loop of an outbound link: pings the peer, reads its responses
/// and fans each one out to the originating frontend. Network timeouts
/// are idle ticks; any other read error closes the session and removes
/// it from the manager.
pub async fn handle_backend_response(
    mgr: Arc<BackendSessionMgr>,
    sess: Arc<BackendSession>,
) {
    sess.start_ping();
    loop {
        match sess.read_request().await {
            Ok(req) => {
                let sess = Arc::clone(&sess);
                tokio::spawn(async move {
                    forward_to_frontend(sess, req).await;
                });
            },
            Err(err) => {
                if is_net_timeout(&err) {
                    continue;
                }
                error!(
                    backend = sess.id(),
                    addr = %sess.client_addr(),
                    "read backend: {:#}", err
                );
                break;
            },
        }
    }
    mgr.del_session(sess.id());
    sess.close().await;
}

/// Delivers one backend response to the frontend session stamped in its
/// conn id, restoring the backend's id on the wire and re-encrypting for
/// the client.
async fn forward_to_frontend(sess: Arc<BackendSession>, mut req: BackendRequest) {
    let conn_id = GamePacket::wrap(req.bytes()).conn_id();
    let Some(frontend) = sess.get_frontend_session(conn_id) else {
        error!(client = conn_id, "frontend session not found");
        req.free();
        return;
    };
    if frontend.is_closed() {
        error!(
            client = conn_id,
            addr = %frontend.client_addr(),
            "frontend session closed"
        );
        req.free();
        return;
    }
    {
        let mut packet = GamePacket::wrap(req.bytes_mut());
        packet.set_conn_id(sess.id());
        packet.encrypt(XOR_KEY);
    }
    if let Err(err) = frontend.write(req.bytes()).await {
        error!(
            client = frontend.id(),
            addr = %frontend.client_addr(),
            "forward response: {:#}", err
        );
    }
    frontend.done_response();
    req.free();
}
