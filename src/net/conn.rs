// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use anyhow::{Result, anyhow};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::{Mutex, OwnedSemaphorePermit},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{
    packet::buffer::PacketBuffer,
    pool::bufreader::{BufReaderPool, PooledBufReader},
};

/// A read or write that did not finish within its deadline.
///
/// Kept as a dedicated type so read loops can tell an idle tick from a
/// broken transport (`utils::is_net_timeout`).
#[derive(Debug, Error)]
#[error("{0} timeout")]
pub struct NetTimeout(pub &'static str);

/// Races an IO future against its deadline and the connection's cancel
/// token.
pub(crate) async fn io_with_timeout<F, T, E>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    if io_timeout.is_zero() {
        return tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
            res = fut => res.map_err(Into::into),
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(NetTimeout(label).into()),
            }
        }
    }
}

/// Accepted stream, tcp or unix, behind one read/write surface.
pub enum NetStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl NetStream {
    pub fn peer_addr(&self) -> String {
        match self {
            Self::Tcp(s) => s
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| String::new()),
            #[cfg(unix)]
            Self::Unix(_) => "unix".to_string(),
        }
    }

    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(s) => s
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| String::new()),
            #[cfg(unix)]
            Self::Unix(_) => "unix".to_string(),
        }
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Base connection shared by frontend and backend sessions.
///
/// Halves are guarded by async mutexes so a session's reader, pinger and
/// forwarding tasks can share one connection; the read half goes through a
/// pooled buffered reader. Read/write deadlines apply per call when
/// configured (zero disables them).
pub struct BaseConn {
    reader: Mutex<PooledBufReader<ReadHalf<NetStream>>>,
    writer: Mutex<WriteHalf<NetStream>>,
    rd_timeout_ms: AtomicU64,
    wr_timeout_ms: AtomicU64,
    closed: AtomicBool,
    /// Cancelled on close, and by the listener when `read_synced` drains
    /// handlers early; pending reads fail over to EOF-like errors.
    cancel: CancellationToken,
    /// Accept-limit permit, released exactly once on close.
    permit: std::sync::Mutex<Option<OwnedSemaphorePermit>>,
    local_addr: String,
    peer_addr: String,
}

impl BaseConn {
    pub fn new(
        stream: NetStream,
        reader_pool: &Arc<BufReaderPool>,
        read_synced: Option<&CancellationToken>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Self> {
        let local_addr = stream.local_addr();
        let peer_addr = stream.peer_addr();
        let cancel = match read_synced {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (r, w) = tokio::io::split(stream);
        Arc::new(Self {
            reader: Mutex::new(reader_pool.get(r)),
            writer: Mutex::new(w),
            rd_timeout_ms: AtomicU64::new(0),
            wr_timeout_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            cancel,
            permit: std::sync::Mutex::new(permit),
            local_addr,
            peer_addr,
        })
    }

    pub fn set_read_timeout(&self, t: Duration) {
        self.rd_timeout_ms.store(t.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_write_timeout(&self, t: Duration) {
        self.wr_timeout_ms.store(t.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_timeout(&self, t: Duration) {
        self.set_read_timeout(t);
        self.set_write_timeout(t);
    }

    fn rd_timeout(&self) -> Duration {
        Duration::from_millis(self.rd_timeout_ms.load(Ordering::Relaxed))
    }

    fn wr_timeout(&self) -> Duration {
        Duration::from_millis(self.wr_timeout_ms.load(Ordering::Relaxed))
    }

    /// Reads one length-prefixed frame into `buf`.
    pub async fn read_packet(&self, buf: &mut PacketBuffer) -> Result<()> {
        let mut r = self.reader.lock().await;
        io_with_timeout(
            "read packet",
            buf.read_from(&mut *r),
            self.rd_timeout(),
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn write_all(&self, b: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        io_with_timeout("write packet", w.write_all(b), self.wr_timeout(), &self.cancel)
            .await
    }

    /// One-shot close: cancels pending IO, sends FIN and releases the
    /// accept permit.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
        {
            let mut w = self.writer.lock().await;
            let _ = w.shutdown().await;
        }
        let permit = {
            let mut slot = self.permit.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        drop(permit);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
