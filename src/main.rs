// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;
use gamegate_rs::{
    auth::token::GameTokenCache,
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    net::server::{ListenerOption, NetServer, Network, Service},
    route::{Action, BaseModule, BytesOut, OutProtocol, RouteRequest, Router},
    service::{
        agent::AgentService, local::LocalAgentService, tunnel_agent::TunnelAgentService,
    },
    tunnel::{manager::BackendSessionMgr, pool::SessionPool},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Demo action: echoes the request payload back.
struct EchoAction;

impl Action for EchoAction {
    fn aid(&self) -> u8 {
        1
    }

    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        Arc::new(BytesOut(Bytes::copy_from_slice(req.data())))
    }
}

/// Demo action: issues a game token for a `user:device` payload.
struct IssueTokenAction {
    tokens: Arc<GameTokenCache>,
}

impl Action for IssueTokenAction {
    fn aid(&self) -> u8 {
        2
    }

    fn handle(&self, req: &dyn RouteRequest) -> Arc<dyn OutProtocol> {
        let raw = String::from_utf8_lossy(req.data());
        let (user_id, dev_id) = raw.split_once(':').unwrap_or((raw.as_ref(), ""));
        let (token, secret) = self.tokens.set_token(user_id, dev_id);
        Arc::new(BytesOut(Bytes::from(format!("{token},{secret}"))))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "demos/config.yaml".to_string());
    let logger_path = args
        .next()
        .unwrap_or_else(|| "demos/config_logger.yaml".to_string());

    let _logger_guard = init_logger(&logger_path)?;

    let cfg = resolve_config_path(&config_path)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let shutdown = CancellationToken::new();

    // Token cache with a periodic expiry sweep dropping lapsed entries.
    let tokens = Arc::new(GameTokenCache::new());
    tokens.set_expired_callback(
        Duration::from_secs(60),
        Arc::new(|user_id, cache| cache.del_token(user_id)),
    );
    tokens.start_expired_sweeper(shutdown.clone());

    let mut router = Router::new();
    router.register(vec![Arc::new(BaseModule::new(
        1,
        vec![
            Arc::new(EchoAction),
            Arc::new(IssueTokenAction {
                tokens: Arc::clone(&tokens),
            }),
        ],
    ))]);
    let router = Arc::new(router);

    // Outbound links to the configured backends.
    let mgr = BackendSessionMgr::new(Arc::clone(SessionPool::backend()), None);
    mgr.set_hosts(cfg.gate.backends.clone());
    mgr.set_self_id(cfg.gate.agent_id);
    mgr.start_connect_hosts(shutdown.clone());

    let mut server = NetServer::new();
    server.set_exit_timeout(cfg.runtime.exit_timeout);
    for listener in &cfg.gate.listeners {
        let opt = ListenerOption {
            name: listener.name.clone(),
            network: if listener.network == "unix" {
                Network::Unix
            } else {
                Network::Tcp
            },
            address: listener.address.clone(),
            chmod: listener.chmod,
            max_conn: listener.max_conn,
            read_synced: listener.read_synced,
        };
        let handler = match listener.name.as_str() {
            "agent" => AgentService::new(Arc::clone(&router)).handler(),
            "tunnel" => TunnelAgentService::new(Arc::clone(&mgr)).handler(),
            _ => LocalAgentService::new(Arc::clone(&router)).handler(),
        };
        server.add_service(Arc::new(Service::with_option(opt, handler)));
    }
    server.init_listeners().await?;
    server.run();
    info!("gate is up");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    mgr.set_service_off();
    server.stop().await;

    Ok(())
}
