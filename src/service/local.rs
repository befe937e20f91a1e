// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    net::server::{HandlerFunc, ServiceConn},
    packet::{XOR_KEY, game::GamePacket},
    route::Router,
    service::{request::Request, response::Response},
    tunnel::{frontend::FrontendSession, pool::SessionPool},
    utils::is_net_timeout,
};

/// Frontend-direct service: answers clients from the local router
/// without any tunnel in between.
pub struct LocalAgentService {
    router: Arc<Router>,
    pool: Arc<SessionPool>,
}

impl LocalAgentService {
    pub fn new(router: Arc<Router>) -> Arc<Self> {
        Self::with_pool(router, Arc::clone(SessionPool::frontend()))
    }

    pub fn with_pool(router: Arc<Router>, pool: Arc<SessionPool>) -> Arc<Self> {
        Arc::new(Self { router, pool })
    }

    /// Connection handler to plug into a net service.
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
        sess.close().await;
    }

    /// One exchange: read, decrypt, dispatch, encrypt, answer.
    async fn serve_session(&self, sess: &Arc<FrontendSession>) {
        let (sid, request) = {
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
            let mut packet = GamePacket::wrap(buf.bytes_mut());
            if !packet.is_valid() {
                error!(addr = %sess.client_addr(), "invalid client packet");
                return;
            }
            // The game server behind a tunnel never decrypts again, so the
            // XOR flag is cleared here.
            packet.decrypt(XOR_KEY);
            if packet.is_cmd_size() || packet.is_cmd_proto() {
                error!(
                    addr = %sess.client_addr(),
                    cmd = packet.cmd_id(),
                    "cmd packet is not permitted"
                );
                return;
            }
            (packet.conn_id(), Request::from_packet(&packet))
        };

        let (mid, aid, pver) = (request.mid, request.aid, request.pver);
        let (result, timed_out) = self.router.dispatch(Arc::new(request)).await;
        if timed_out {
            error!(
                addr = %sess.client_addr(),
                mid, aid, "response timeout"
            );
        }
        debug!(addr = %sess.client_addr(), mid, aid, "dispatch done");

        let response = Response {
            conn_id: sid,
            mid,
            aid,
            pver,
            pflag: 0,
            result,
        };
        match response.into_packet() {
            Ok(packet) => {
                if let Err(err) = sess.write(packet.as_bytes()).await {
                    error!(
                        addr = %sess.client_addr(),
                        mid, aid, "write response: {:#}", err
                    );
                }
            },
            Err(err) => {
                error!(
                    addr = %sess.client_addr(),
                    mid, aid, "marshal response: {:#}", err
                );
            },
        }
    }
}
