// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    net::server::{HandlerFunc, ServiceConn},
    packet::game::{CMD_PING, CMD_REGISTER, GamePacket},
    route::Router,
    service::request::Request,
    tunnel::{
        backend::{BackendRequest, BackendSession},
        pool::SessionPool,
    },
    utils::is_net_timeout,
};

/// Backend-side service for inbound tunnel links.
///
/// Each accepted connection is a long-lived agent link: cmd packets feed
/// the liveness state, everything else dispatches through the router
/// concurrently and the reply keeps the originating conn id.
pub struct AgentService {
    router: Arc<Router>,
    pool: Arc<SessionPool>,
}

impl AgentService {
    pub fn new(router: Arc<Router>) -> Arc<Self> {
        Self::with_pool(router, Arc::clone(SessionPool::backend()))
    }

    pub fn with_pool(router: Arc<Router>, pool: Arc<SessionPool>) -> Arc<Self> {
        Arc::new(Self { router, pool })
    }

    pub fn handler(self: &Arc<Self>) -> HandlerFunc {
        let svc = Arc::clone(self);
        Arc::new(move |conn| {
            let svc = Arc::clone(&svc);
            Box::pin(async move { svc.serve(conn).await })
        })
    }

    async fn serve(self: Arc<Self>, conn: ServiceConn) {
        let sess = BackendSession::from_service_conn(0, conn, &self.pool);
        sess.start_check_ping();
        info!(addr = %sess.client_addr(), "agent link up");
        loop {
            match sess.read_request().await {
                Ok(req) => {
                    let svc = Arc::clone(&self);
                    let handler_sess = Arc::clone(&sess);
                    sess.spawn_request(async move {
                        svc.handle_agent_request(handler_sess, req).await;
                    });
                },
                Err(err) => {
                    // A quiet link is fine; only real errors break it.
                    if is_net_timeout(&err) {
                        continue;
                    }
                    error!(addr = %sess.client_addr(), "read agent: {:#}", err);
                    break;
                },
            }
        }
        sess.wait_requests_done().await;
        sess.close().await;
    }

    fn handle_agent_cmd(&self, sess: &Arc<BackendSession>, cmd: u8, conn_id: u32) {
        match cmd {
            CMD_PING => sess.update_ping(),
            CMD_REGISTER => {
                info!(addr = %sess.client_addr(), sid = conn_id, "agent registered");
            },
            _ => {
                error!(addr = %sess.client_addr(), cmd, "invalid cmd");
            },
        }
    }

    async fn handle_agent_request(
        &self,
        sess: Arc<BackendSession>,
        mut req: BackendRequest,
    ) {
        // Data from an agent link arrives already decrypted.
        let (is_cmd, cmd, conn_id, request) = {
            let packet = GamePacket::wrap(req.bytes());
            (
                packet.is_cmd_size() || packet.is_cmd_proto(),
                packet.cmd_id(),
                packet.conn_id(),
                Request::from_packet(&packet),
            )
        };
        req.free();

        if is_cmd {
            self.handle_agent_cmd(&sess, cmd, conn_id);
            return;
        }

        let (mid, aid, pver) = (request.mid, request.aid, request.pver);
        debug!(
            addr = %sess.client_addr(),
            cid = conn_id,
            mid, aid, "agent request"
        );
        let (result, timed_out) = self.router.dispatch(Arc::new(request)).await;
        if timed_out {
            error!(
                addr = %sess.client_addr(),
                cid = conn_id,
                mid, aid, "response timeout"
            );
        }

        let out = match result.marshal() {
            Ok(out) => out,
            Err(err) => {
                error!(
                    addr = %sess.client_addr(),
                    cid = conn_id,
                    mid, aid, "marshal error: {:#}", err
                );
                return;
            },
        };

        // Replies travel server-to-server in the clear; the tunnel edge
        // encrypts on the way out to the client.
        let mut packet = GamePacket::from_data(&out, None);
        packet.set_conn_id(conn_id);
        packet.set_mid(mid);
        packet.set_aid(aid);
        packet.set_proto_ver(pver);
        if let Err(err) = sess.write(packet.as_bytes()).await {
            error!(
                addr = %sess.client_addr(),
                cid = conn_id,
                mid, aid, "write response: {:#}", err
            );
        }
    }
}
