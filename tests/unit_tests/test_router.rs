// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use gamegate_rs::{
    route::{
        Action, BaseModule, BytesOut, OutProtocol, RouteEnabler, RouteRequest, Router,
        Timeouter,
    },
    service::request::Request,
};

struct EchoAction;

impl Action for EchoAction {
    fn aid(&self) -> u8 {
        1
    }

    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        Arc::new(BytesOut(Bytes::copy_from_slice(req.data())))
    }
}

struct SlowAction(Duration);

impl Action for SlowAction {
    fn aid(&self) -> u8 {
        2
    }

    fn handle(&self, _req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        std::thread::sleep(self.0);
        Arc::new(BytesOut(Bytes::from_static(b"slow")))
    }
}

struct PanicAction;

impl Action for PanicAction {
    fn aid(&self) -> u8 {
        3
    }

    fn handle(&self, _req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        panic!("handler blew up");
    }
}

struct FixedTimeouter(Duration);

impl Timeouter for FixedTimeouter {
    fn timeout(&self) -> Duration {
        self.0
    }

    fn result(&self) -> Arc<dyn OutProtocol> {
        Arc::new(BytesOut(Bytes::from_static(b"timed out")))
    }
}

struct DenyAll;

impl RouteEnabler for DenyAll {
    fn enabled(&self, _mid: u8, _aid: u8) -> bool {
        false
    }
}

fn request(mid: u8, aid: u8, data: &[u8]) -> Arc<dyn RouteRequest> {
    Arc::new(Request {
        mid,
        aid,
        pver: 1,
        data: Bytes::copy_from_slice(data),
        sign: None,
    })
}

fn build_router() -> Router {
    let mut router = Router::new();
    router.register(vec![Arc::new(BaseModule::new(
        1,
        vec![
            Arc::new(EchoAction),
            Arc::new(SlowAction(Duration::from_millis(400))),
            Arc::new(PanicAction),
        ],
    ))]);
    router
}

#[tokio::test]
async fn test_dispatch_to_registered_action() {
    let router = build_router();
    let (out, timed_out) = router.dispatch(request(1, 1, b"hello")).await;
    assert!(!timed_out);
    assert_eq!(out.marshal().expect("marshal"), Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_unknown_module_and_action() {
    let router = build_router();

    let (out, timed_out) = router.dispatch(request(9, 1, b"x")).await;
    assert!(!timed_out);
    assert!(out.marshal().expect("marshal").is_empty());

    let (out, _) = router.dispatch(request(1, 99, b"x")).await;
    assert!(out.marshal().expect("marshal").is_empty());
}

#[tokio::test]
async fn test_disabled_route() {
    let router = build_router().with_enabler(Arc::new(DenyAll));
    let (out, timed_out) = router.dispatch(request(1, 1, b"x")).await;
    assert!(!timed_out);
    assert!(out.marshal().expect("marshal").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_action_timeout_returns_canned_result() {
    let router =
        build_router().with_timeouter(Arc::new(FixedTimeouter(Duration::from_millis(100))));

    let started = Instant::now();
    let (out, timed_out) = router.dispatch(request(1, 2, b"x")).await;
    let elapsed = started.elapsed();

    assert!(timed_out);
    assert_eq!(
        out.marshal().expect("marshal"),
        Bytes::from_static(b"timed out")
    );
    assert!(
        elapsed < Duration::from_millis(350),
        "canned reply must beat the action, took {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fast_action_beats_timeouter() {
    let router =
        build_router().with_timeouter(Arc::new(FixedTimeouter(Duration::from_secs(5))));
    let (out, timed_out) = router.dispatch(request(1, 1, b"quick")).await;
    assert!(!timed_out);
    assert_eq!(out.marshal().expect("marshal"), Bytes::from_static(b"quick"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_action_panic_is_contained() {
    let router =
        build_router().with_timeouter(Arc::new(FixedTimeouter(Duration::from_secs(5))));
    let (out, timed_out) = router.dispatch(request(1, 3, b"x")).await;
    assert!(!timed_out);
    assert!(out.marshal().expect("marshal").is_empty());
}
