// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use gamegate_rs::host::{HostModule, ModuleHost, TickerAction};

struct RecordingModule {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingModule {
    fn record(&self, hook: &str) {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{}:{hook}", self.name));
    }
}

impl HostModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_config(&self, _path: &Path) -> Result<()> {
        self.record("load_config");
        Ok(())
    }

    fn init(&self) -> Result<()> {
        self.record("init");
        Ok(())
    }

    fn load_related_modules(&self) -> Result<()> {
        self.record("load_related");
        Ok(())
    }

    fn pre_ticker(&self) -> Result<()> {
        self.record("pre_ticker");
        Ok(())
    }

    fn pre_shut(&self) -> Result<()> {
        self.record("pre_shut");
        Ok(())
    }

    fn shut(&self) -> Result<()> {
        self.record("shut");
        Ok(())
    }
}

#[test]
fn test_lifecycle_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut host = ModuleHost::new();
    host.register(Arc::new(RecordingModule {
        name: "a".into(),
        log: Arc::clone(&log),
    }))
    .expect("register a");
    host.register(Arc::new(RecordingModule {
        name: "b".into(),
        log: Arc::clone(&log),
    }))
    .expect("register b");

    host.start().expect("start");
    host.stop();

    let log = log.lock().expect("log lock");
    assert_eq!(
        &*log,
        &[
            "a:init",
            "b:init",
            "a:load_related",
            "b:load_related",
            "a:pre_ticker",
            "b:pre_ticker",
            "a:pre_shut",
            "b:pre_shut",
            "a:shut",
            "b:shut",
        ]
    );
}

#[test]
fn test_duplicate_module_name_rejected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut host = ModuleHost::new();
    host.register(Arc::new(RecordingModule {
        name: "dup".into(),
        log: Arc::clone(&log),
    }))
    .expect("first registration");
    let err = host
        .register(Arc::new(RecordingModule {
            name: "dup".into(),
            log,
        }))
        .expect_err("duplicate must fail");
    assert!(err.to_string().contains("repeated module name"));
    assert!(host.find("dup").is_some());
}

struct CountdownModule {
    ticks: AtomicU32,
    action_when_done: TickerAction,
}

impl HostModule for CountdownModule {
    fn name(&self) -> &str {
        "countdown"
    }

    fn ticker(&self) -> (Duration, TickerAction) {
        let left = self.ticks.fetch_sub(1, Ordering::AcqRel);
        if left > 1 {
            (Duration::from_millis(10), TickerAction::Continue)
        } else {
            (Duration::ZERO, self.action_when_done)
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticker_shutdown_cancels_host_token() {
    let mut host = ModuleHost::new();
    host.register(Arc::new(CountdownModule {
        ticks: AtomicU32::new(3),
        action_when_done: TickerAction::Shutdown,
    }))
    .expect("register");

    let shutdown = host.shutdown_token();
    host.spawn_tickers();

    tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
        .await
        .expect("ticker must request shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticker_stop_leaves_host_running() {
    let mut host = ModuleHost::new();
    host.register(Arc::new(CountdownModule {
        ticks: AtomicU32::new(2),
        action_when_done: TickerAction::Stop,
    }))
    .expect("register");

    let shutdown = host.shutdown_token();
    host.spawn_tickers();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!shutdown.is_cancelled());
}
