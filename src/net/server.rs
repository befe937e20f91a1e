// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tokio::{
    net::TcpListener,
    sync::OwnedSemaphorePermit,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::net::{conn::NetStream, limit::LimitListener};

/// How long a stopping server waits for in-flight handlers by default.
const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(180);

/// Accept backoff window for temporary errors.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

/// Options for a stoppable listener.
#[derive(Debug, Clone)]
pub struct ListenerOption {
    pub name: String,
    pub network: Network,
    /// `ip:port` for tcp, socket path for unix.
    pub address: String,
    /// File mode for unix sockets, 0o666 when unset.
    pub chmod: Option<u32>,
    /// Maximum simultaneous connections; 0 disables the limit.
    pub max_conn: usize,
    /// When set, connections stop reading as soon as the server begins
    /// shutting down, so handlers can exit promptly.
    pub read_synced: bool,
}

impl ListenerOption {
    pub fn tcp(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            network: Network::Tcp,
            address: address.to_string(),
            chmod: None,
            max_conn: 0,
            read_synced: false,
        }
    }
}

/// A bound listener, tcp or unix.
pub enum NetListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl NetListener {
    /// Binds per the option; unix sockets are unlinked first and chmodded
    /// after.
    pub async fn bind(opt: &ListenerOption) -> Result<Self> {
        match opt.network {
            Network::Tcp => {
                let l = TcpListener::bind(&opt.address)
                    .await
                    .with_context(|| format!("bind() failed on tcp {}", opt.address))?;
                Ok(Self::Tcp(l))
            },
            #[cfg(unix)]
            Network::Unix => {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::remove_file(&opt.address);
                let l = tokio::net::UnixListener::bind(&opt.address)
                    .with_context(|| format!("bind() failed on unix {}", opt.address))?;
                let mode = opt.chmod.unwrap_or(0o666);
                std::fs::set_permissions(
                    &opt.address,
                    std::fs::Permissions::from_mode(mode),
                )
                .with_context(|| format!("chmod {} failed", opt.address))?;
                Ok(Self::Unix(l))
            },
            #[cfg(not(unix))]
            Network::Unix => {
                bail!("unix sockets are not supported on this platform")
            },
        }
    }

    pub async fn accept(&self) -> io::Result<NetStream> {
        match self {
            Self::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                stream.set_nodelay(true)?;
                Ok(NetStream::Tcp(stream))
            },
            #[cfg(unix)]
            Self::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok(NetStream::Unix(stream))
            },
        }
    }

    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| String::new()),
            #[cfg(unix)]
            Self::Unix(_) => "unix".to_string(),
        }
    }
}

/// Accept errors worth retrying with backoff rather than tearing the
/// service down.
pub fn is_temporary_accept(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// An accepted connection handed to a service handler.
pub struct ServiceConn {
    pub stream: NetStream,
    /// Accept-limit permit; keep it alive for the life of the connection.
    pub permit: Option<OwnedSemaphorePermit>,
    /// Present when the listener runs with `read_synced`.
    pub read_synced: Option<CancellationToken>,
}

pub type HandlerFunc =
    Arc<dyn Fn(ServiceConn) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Listener handle given to a servicer's accept loop.
pub struct ServiceListener {
    source: AcceptSource,
    closed: CancellationToken,
    read_synced: Option<CancellationToken>,
    tracker: TaskTracker,
    conn_num: Arc<AtomicI32>,
}

enum AcceptSource {
    Plain(NetListener),
    Limited(LimitListener),
}

impl ServiceListener {
    pub async fn accept(&self) -> Result<ServiceConn> {
        let (stream, permit) = match &self.source {
            AcceptSource::Plain(l) => {
                let stream = tokio::select! {
                    _ = self.closed.cancelled() => bail!("listener closed"),
                    res = l.accept() => res?,
                };
                (stream, None)
            },
            AcceptSource::Limited(l) => {
                let (stream, permit) = tokio::select! {
                    _ = self.closed.cancelled() => bail!("listener closed"),
                    res = l.accept() => res?,
                };
                (stream, Some(permit))
            },
        };
        Ok(ServiceConn {
            stream,
            permit,
            read_synced: self.read_synced.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Runs a connection handler under the server's drain tracker.
    pub fn spawn_handler(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        let conn_num = Arc::clone(&self.conn_num);
        conn_num.fetch_add(1, Ordering::AcqRel);
        self.tracker.spawn(async move {
            fut.await;
            conn_num.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn close(&self) {
        self.closed.cancel();
        if let AcceptSource::Limited(l) = &self.source {
            l.close();
        }
    }
}

/// The seam net services plug into the host through.
pub trait NetServicer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn listener_option(&self) -> ListenerOption;

    /// Produces the bound listener; the default binds straight from the
    /// listener option.
    fn new_listener(&self) -> Pin<Box<dyn Future<Output = Result<NetListener>> + Send + '_>> {
        let opt = self.listener_option();
        Box::pin(async move { NetListener::bind(&opt).await })
    }

    fn serve(self: Arc<Self>, l: ServiceListener)
    -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A plain tcp/unix service: a listener option plus a connection handler,
/// served with temporary-error backoff.
pub struct Service {
    opt: ListenerOption,
    handler: HandlerFunc,
}

impl Service {
    pub fn new(name: &str, address: &str, handler: HandlerFunc) -> Self {
        Self {
            opt: ListenerOption::tcp(name, address),
            handler,
        }
    }

    pub fn with_option(opt: ListenerOption, handler: HandlerFunc) -> Self {
        Self { opt, handler }
    }
}

impl NetServicer for Service {
    fn name(&self) -> &str {
        &self.opt.name
    }

    fn listener_option(&self) -> ListenerOption {
        self.opt.clone()
    }

    fn serve(
        self: Arc<Self>,
        l: ServiceListener,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            info!(service = %self.opt.name, address = %self.opt.address, "service bound");
            let mut temp_delay = Duration::ZERO;
            loop {
                match l.accept().await {
                    Ok(conn) => {
                        temp_delay = Duration::ZERO;
                        l.spawn_handler((self.handler)(conn));
                    },
                    Err(err) => {
                        if l.is_closed() {
                            info!(service = %self.opt.name, "listener closed");
                            break;
                        }
                        let temporary = err
                            .downcast_ref::<io::Error>()
                            .is_some_and(is_temporary_accept);
                        if temporary {
                            temp_delay = if temp_delay.is_zero() {
                                ACCEPT_BACKOFF_MIN
                            } else {
                                (temp_delay * 2).min(ACCEPT_BACKOFF_MAX)
                            };
                            sleep(temp_delay).await;
                            continue;
                        }
                        error!(service = %self.opt.name, "accept error: {:#}", err);
                        break;
                    },
                }
            }
        })
    }
}

struct NetService {
    servicer: Arc<dyn NetServicer>,
    listener: Option<ServiceListener>,
    closer: CancellationToken,
    conn_num: Arc<AtomicI32>,
}

/// Holds a set of named net services and drives their lifecycle: bind,
/// serve, then graceful drain on stop.
pub struct NetServer {
    services: HashMap<String, NetService>,
    tracker: TaskTracker,
    read_synced: CancellationToken,
    exit_timeout: Duration,
}

impl Default for NetServer {
    fn default() -> Self {
        Self::new()
    }
}

impl NetServer {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            tracker: TaskTracker::new(),
            read_synced: CancellationToken::new(),
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    pub fn set_exit_timeout(&mut self, t: Duration) {
        if !t.is_zero() {
            self.exit_timeout = t;
        }
    }

    pub fn add_service(&mut self, servicer: Arc<dyn NetServicer>) {
        self.services.insert(
            servicer.name().to_string(),
            NetService {
                servicer,
                listener: None,
                closer: CancellationToken::new(),
                conn_num: Arc::new(AtomicI32::new(0)),
            },
        );
    }

    /// Current connection count of a named service.
    pub fn conn_num(&self, name: &str) -> Option<i32> {
        self.services
            .get(name)
            .map(|s| s.conn_num.load(Ordering::Acquire))
    }

    /// Binds every service's listener; fails fast on the first bind error.
    pub async fn init_listeners(&mut self) -> Result<()> {
        for service in self.services.values_mut() {
            let opt = service.servicer.listener_option();
            let inner = service.servicer.new_listener().await?;
            let source = if opt.max_conn > 0 {
                AcceptSource::Limited(LimitListener::new(inner, opt.max_conn))
            } else {
                AcceptSource::Plain(inner)
            };
            service.listener = Some(ServiceListener {
                source,
                closed: service.closer.clone(),
                read_synced: opt.read_synced.then(|| self.read_synced.clone()),
                tracker: self.tracker.clone(),
                conn_num: Arc::clone(&service.conn_num),
            });
        }
        Ok(())
    }

    /// The bound address of a named service, useful with port 0 binds.
    pub fn local_addr(&self, name: &str) -> Option<String> {
        match &self.services.get(name)?.listener.as_ref()?.source {
            AcceptSource::Plain(l) => Some(l.local_addr()),
            AcceptSource::Limited(_) => None,
        }
    }

    /// Starts every service's serve loop.
    pub fn run(&mut self) {
        for service in self.services.values_mut() {
            let Some(listener) = service.listener.take() else {
                warn!(service = %service.servicer.name(), "run before init_listeners");
                continue;
            };
            let servicer = Arc::clone(&service.servicer);
            self.tracker.spawn(servicer.serve(listener));
        }
    }

    /// Stops listeners, drains read-synced connections, then waits for
    /// in-flight handlers up to the exit timeout.
    pub async fn stop(&mut self) {
        for service in self.services.values() {
            service.closer.cancel();
            if let Some(l) = &service.listener {
                l.close();
            }
        }
        self.read_synced.cancel();
        self.tracker.close();
        tokio::select! {
            _ = self.tracker.wait() => {},
            _ = sleep(self.exit_timeout) => {
                warn!("exit timeout reached, abandoning in-flight handlers");
            },
        }
    }
}
