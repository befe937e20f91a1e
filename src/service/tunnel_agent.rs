// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tracing::error;

use crate::{
    net::server::{HandlerFunc, ServiceConn},
    packet::{XOR_KEY, game::GamePacket},
    tunnel::{frontend::FrontendSession, manager::BackendSessionMgr, pool::SessionPool},
    utils::is_net_timeout,
};

/// Frontend-tunnelled service: forwards each client request over the
/// persistent link to the backend stamped in the packet's conn id, then
/// parks the session until the reply loop delivers the response.
pub struct TunnelAgentService {
    mgr: Arc<BackendSessionMgr>,
    pool: Arc<SessionPool>,
}

impl TunnelAgentService {
    pub fn new(mgr: Arc<BackendSessionMgr>) -> Arc<Self> {
        Self::with_pool(mgr, Arc::clone(SessionPool::frontend()))
    }

    pub fn with_pool(mgr: Arc<BackendSessionMgr>, pool: Arc<SessionPool>) -> Arc<Self> {
        Arc::new(Self { mgr, pool })
    }

    pub fn handler(self: &Arc<Self>) -> HandlerFunc {
        let svc = Arc::clone(self);
        Arc::new(move |conn| {
            let svc = Arc::clone(&svc);
            Box::pin(async move { svc.serve(conn).await })
        })
    }

    async fn serve(&self, conn: ServiceConn) {
        let sess = FrontendSession::new(conn, &self.pool);
        self.serve_session(&sess).await;
        sess.unbind_backend_session();
        sess.close().await;
    }

    async fn serve_session(&self, sess: &Arc<FrontendSession>) {
        let mut buf = match sess.read_packet().await {
            Ok(buf) => buf,
            Err(err) => {
                if !is_net_timeout(&err) {
                    error!(
                        addr = %sess.client_addr(),
                        "read client request: {:#}", err
                    );
                }
                return;
            },
        };
        let sid = {
            let mut packet = GamePacket::wrap(buf.bytes_mut());
            if !packet.is_valid() {
                error!(addr = %sess.client_addr(), "invalid client packet");
                return;
            }
            packet.decrypt(XOR_KEY);
            if packet.is_cmd_size() || packet.is_cmd_proto() {
                error!(
                    addr = %sess.client_addr(),
                    cmd = packet.cmd_id(),
                    "cmd packet is not permitted"
                );
                return;
            }
            packet.conn_id()
        };

        if self.mgr.is_service_off() {
            error!(addr = %sess.client_addr(), "tunnel service is off");
            return;
        }
        let Some(backend) = self.mgr.try_get_session(sid).await else {
            error!(
                addr = %sess.client_addr(),
                backend = sid,
                "no backend session"
            );
            return;
        };

        // Bind first so the reply loop can find us by the conn id we
        // stamp into the forwarded packet.
        sess.bind_backend_session(&backend);
        {
            let mut packet = GamePacket::wrap(buf.bytes_mut());
            packet.set_conn_id(sess.id());
        }
        if let Err(err) = backend.write(buf.bytes()).await {
            error!(
                addr = %sess.client_addr(),
                backend = sid,
                "forward request: {:#}", err
            );
            return;
        }
        drop(buf);
        sess.wait_response().await;
    }
}
