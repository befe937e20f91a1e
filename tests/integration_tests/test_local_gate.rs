// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use gamegate_rs::{
    net::server::{NetServer, Service},
    packet::{XOR_KEY, game::GamePacket},
    route::{Action, BaseModule, BytesOut, OutProtocol, RouteRequest, Router},
    service::local::LocalAgentService,
};
use tokio::{io::AsyncWriteExt, net::TcpStream};

use super::read_frame;

struct EchoAction;

impl Action for EchoAction {
    fn aid(&self) -> u8 {
        1
    }

    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        Arc::new(BytesOut(Bytes::copy_from_slice(req.data())))
    }
}

fn echo_router() -> Arc<Router> {
    let mut router = Router::new();
    router.register(vec![Arc::new(BaseModule::new(1, vec![Arc::new(EchoAction)]))]);
    Arc::new(router)
}

async fn start_local_gate() -> (NetServer, String) {
    let svc = LocalAgentService::new(echo_router());
    let mut server = NetServer::new();
    server.set_exit_timeout(Duration::from_secs(2));
    server.add_service(Arc::new(Service::new(
        "client",
        "127.0.0.1:0",
        svc.handler(),
    )));
    server.init_listeners().await.expect("bind gate");
    let addr = server.local_addr("client").expect("bound addr");
    server.run();
    (server, addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_roundtrip() {
    let (mut server, addr) = start_local_gate().await;

    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    let mut packet = GamePacket::from_data(b"hello gate", None);
    packet.set_conn_id(0);
    packet.set_mid(1);
    packet.set_aid(1);
    packet.set_proto_ver(3);
    packet.encrypt(XOR_KEY);
    stream.write_all(packet.as_bytes()).await.expect("send");

    let frame = read_frame(&mut stream).await.expect("response frame");
    let mut reply = GamePacket::wrap(frame);
    assert!(reply.is_valid());
    assert!(reply.is_encrypted(), "responses travel encrypted");
    reply.decrypt(XOR_KEY);
    assert_eq!(reply.payload(), b"hello gate");
    assert_eq!(reply.mid(), 1);
    assert_eq!(reply.aid(), 1);
    assert_eq!(reply.proto_ver(), 3);
    assert_eq!(reply.conn_id(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cmd_packet_rejected_on_client_path() {
    let (mut server, addr) = start_local_gate().await;

    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    stream
        .write_all(GamePacket::ping().as_bytes())
        .await
        .expect("send cmd");

    // The session drops without answering.
    assert!(read_frame(&mut stream).await.is_err());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_frame_closes_session() {
    let (mut server, addr) = start_local_gate().await;

    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    // Advertises 4 bytes but carries a truncated game header.
    stream.write_all(&[0x00, 0x04, 1, 2, 3, 4]).await.expect("send");

    assert!(read_frame(&mut stream).await.is_err());

    server.stop().await;
}
