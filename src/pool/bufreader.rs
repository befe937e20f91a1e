// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cmp,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, ready},
};

use tokio::io::{AsyncRead, ReadBuf};

/// Pool of fixed-size read buffers for [`PooledBufReader`].
///
/// The buffer size is fixed at construction; `get` wraps any reader into a
/// buffered one and the internal buffer returns to the pool when the wrapper
/// is freed or dropped. A wrapper must not be used after `free`.
pub struct BufReaderPool {
    buf_size: usize,
    max_free: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufReaderPool {
    pub fn new(max_free: usize, buf_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buf_size,
            max_free,
            free: Mutex::new(Vec::new()),
        })
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Wraps `inner` with a pooled read buffer.
    pub fn get<R>(self: &Arc<Self>, inner: R) -> PooledBufReader<R> {
        let buf = {
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        }
        .unwrap_or_else(|| vec![0u8; self.buf_size].into_boxed_slice());
        PooledBufReader {
            inner,
            pool: Arc::clone(self),
            buf: Some(buf),
            pos: 0,
            filled: 0,
        }
    }

    fn put(&self, buf: Box<[u8]>) {
        if buf.len() != self.buf_size {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.max_free {
            free.push(buf);
        }
    }
}

/// Buffered reader whose internal buffer is borrowed from a [`BufReaderPool`].
pub struct PooledBufReader<R> {
    inner: R,
    pool: Arc<BufReaderPool>,
    buf: Option<Box<[u8]>>,
    pos: usize,
    filled: usize,
}

impl<R> PooledBufReader<R> {
    /// Releases the wrapper, returning its buffer to the pool.
    pub fn free(self) {}

    fn release_buf(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
        self.pos = 0;
        self.filled = 0;
    }
}

impl<R> Drop for PooledBufReader<R> {
    fn drop(&mut self) {
        self.release_buf();
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PooledBufReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos >= this.filled {
            let Some(buf) = this.buf.as_mut() else {
                // Freed wrapper: pass through unbuffered.
                return Pin::new(&mut this.inner).poll_read(cx, out);
            };
            // Large reads bypass the buffer entirely.
            if out.remaining() >= buf.len() {
                return Pin::new(&mut this.inner).poll_read(cx, out);
            }
            let mut fill = ReadBuf::new(buf);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut fill))?;
            this.filled = fill.filled().len();
            this.pos = 0;
            if this.filled == 0 {
                // EOF from the underlying reader.
                return Poll::Ready(Ok(()));
            }
        }
        if let Some(buf) = this.buf.as_ref() {
            let n = cmp::min(out.remaining(), this.filled - this.pos);
            out.put_slice(&buf[this.pos..this.pos + n]);
            this.pos += n;
        }
        Poll::Ready(Ok(()))
    }
}
