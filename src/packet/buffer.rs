// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{packet::SIZE_LEN, pool::slab::SlabPool};

/// Length-prefixed packet reader backed by a slab pool.
///
/// One frame at a time: the 2-byte big-endian size prefix is read first,
/// the payload buffer is drawn from the pool (or the heap when unpooled),
/// and partial reads fail the whole frame. `bytes` exposes the complete
/// frame, size prefix included.
pub struct PacketBuffer {
    data: Option<Vec<u8>>,
    max_size: usize,
    pool: Option<Arc<SlabPool>>,
}

impl PacketBuffer {
    pub fn new(max_size: usize, pool: Option<Arc<SlabPool>>) -> Self {
        Self {
            data: None,
            max_size,
            pool,
        }
    }

    fn alloc(&mut self, size: usize) {
        if size > self.max_size {
            return;
        }
        self.data = Some(match &self.pool {
            Some(pool) => pool.alloc(size),
            None => vec![0u8; size],
        });
    }

    /// Reads one complete frame. Frames advertising more than
    /// `max_size - 2` payload bytes are rejected before any allocation.
    pub async fn read_from<R: AsyncRead + Unpin>(&mut self, r: &mut R) -> Result<usize> {
        let mut size_header = [0u8; SIZE_LEN];
        r.read_exact(&mut size_header)
            .await
            .context("read packet size")?;

        let size = usize::from(u16::from_be_bytes(size_header));
        self.free();
        self.alloc(SIZE_LEN + size);
        let Some(data) = self.data.as_mut() else {
            bail!("invalid packet size({}>{})", size, self.max_size - SIZE_LEN);
        };

        data[0] = size_header[0];
        data[1] = size_header[1];
        r.read_exact(&mut data[SIZE_LEN..SIZE_LEN + size])
            .await
            .with_context(|| format!("read packet(size={size})"))?;

        Ok(SIZE_LEN + size)
    }

    /// The complete frame, size prefix included; empty before a read.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// A fresh empty buffer sharing the pool and size limit. The frame
    /// data is intentionally not carried over; clones hand off reading
    /// context, not contents.
    pub fn clone_empty(&self) -> Self {
        Self {
            data: None,
            max_size: self.max_size,
            pool: self.pool.clone(),
        }
    }

    /// Releases the frame back to its pool. Safe to call repeatedly.
    pub fn free(&mut self) {
        if let Some(data) = self.data.take()
            && let Some(pool) = &self.pool
        {
            pool.free(data);
        }
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        self.free();
    }
}
