// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Module/action dispatch.
//!
//! Modules register by module id and own their actions by action id.
//! Dispatch gates on the route enabler, falls back to the none-response
//! for unknown targets, and, when a timeouter is configured, races the
//! action against its deadline — the caller gets the canned reply on
//! timeout while the action finishes detached and its result is dropped.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::error;

/// Outbound protocol message.
pub trait OutProtocol: Send + Sync {
    fn marshal(&self) -> Result<Bytes>;
}

/// A raw-bytes message.
#[derive(Debug, Clone, Default)]
pub struct BytesOut(pub Bytes);

impl OutProtocol for BytesOut {
    fn marshal(&self) -> Result<Bytes> {
        Ok(self.0.clone())
    }
}

/// The request surface the router dispatches on.
pub trait RouteRequest: Send + Sync {
    fn mid(&self) -> u8;
    fn aid(&self) -> u8;
    fn proto_ver(&self) -> u8;
    fn data(&self) -> &[u8];
    fn sign(&self) -> Option<&[u8]>;
}

/// Enables or disables routes by `(mid, aid)`.
pub trait RouteEnabler: Send + Sync {
    fn enabled(&self, mid: u8, aid: u8) -> bool;
}

struct FullRouteEnabler;

impl RouteEnabler for FullRouteEnabler {
    fn enabled(&self, _mid: u8, _aid: u8) -> bool {
        true
    }
}

/// Supplies the deadline and the canned reply for overrunning actions.
pub trait Timeouter: Send + Sync {
    fn timeout(&self) -> Duration;
    fn result(&self) -> Arc<dyn OutProtocol>;
}

/// Handler for one action id.
pub trait Action: Send + Sync {
    fn aid(&self) -> u8;
    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol>;
}

/// Handler for one module id.
pub trait Module: Send + Sync {
    fn mid(&self) -> u8;
    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol>;
}

fn none_out() -> Arc<dyn OutProtocol> {
    Arc::new(BytesOut(Bytes::new()))
}

/// A module built from registered actions; unknown action ids answer
/// with the empty message.
pub struct BaseModule {
    mid: u8,
    actions: HashMap<u8, Arc<dyn Action>>,
}

impl BaseModule {
    pub fn new(mid: u8, actions: Vec<Arc<dyn Action>>) -> Self {
        let actions = actions.into_iter().map(|a| (a.aid(), a)).collect();
        Self { mid, actions }
    }
}

impl Module for BaseModule {
    fn mid(&self) -> u8 {
        self.mid
    }

    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        match self.actions.get(&req.aid()) {
            Some(action) => action.handle(req),
            None => {
                error!(mid = self.mid, aid = req.aid(), "action not found");
                none_out()
            },
        }
    }
}

/// Module/action dispatcher.
pub struct Router {
    modules: HashMap<u8, Arc<dyn Module>>,
    enabler: Arc<dyn RouteEnabler>,
    timeouter: Option<Arc<dyn Timeouter>>,
    none_resp: Arc<dyn OutProtocol>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            enabler: Arc::new(FullRouteEnabler),
            timeouter: None,
            none_resp: none_out(),
        }
    }

    pub fn with_enabler(mut self, enabler: Arc<dyn RouteEnabler>) -> Self {
        self.enabler = enabler;
        self
    }

    pub fn with_timeouter(mut self, timeouter: Arc<dyn Timeouter>) -> Self {
        self.timeouter = Some(timeouter);
        self
    }

    pub fn with_none_response(mut self, resp: Arc<dyn OutProtocol>) -> Self {
        self.none_resp = resp;
        self
    }

    pub fn register(&mut self, modules: Vec<Arc<dyn Module>>) {
        for module in modules {
            self.modules.insert(module.mid(), module);
        }
    }

    /// Dispatches a request; the bool reports a timed-out action.
    pub async fn dispatch(
        &self,
        req: Arc<dyn RouteRequest>,
    ) -> (Arc<dyn OutProtocol>, bool) {
        let (mid, aid) = (req.mid(), req.aid());
        if !self.enabler.enabled(mid, aid) {
            error!(mid, aid, "route disabled");
            return (self.none_resp.clone(), false);
        }
        let Some(module) = self.modules.get(&mid) else {
            error!(mid, "module not found");
            return (self.none_resp.clone(), false);
        };

        let Some(timeouter) = &self.timeouter else {
            return (module.handle(req.as_ref()), false);
        };

        // Race the action against its deadline in a detached task; on
        // timeout the late result lands in the abandoned channel slot.
        let (tx, mut rx) = mpsc::channel::<Arc<dyn OutProtocol>>(1);
        let module = Arc::clone(module);
        tokio::spawn(async move {
            let out = module.handle(req.as_ref());
            let _ = tx.send(out).await;
        });
        tokio::select! {
            out = rx.recv() => {
                // A dropped sender means the action panicked.
                (out.unwrap_or_else(|| self.none_resp.clone()), false)
            },
            _ = tokio::time::sleep(timeouter.timeout()) => {
                (timeouter.result(), true)
            },
        }
    }
}
