// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::{
    packet::{MAX_PACKET_SIZE, buffer::PacketBuffer},
    pool::{bufreader::BufReaderPool, slab::SlabPool},
};

/// The buffer pools one side of the tunnel draws from: a slab pool for
/// packet frames and a pool of buffered readers for connections.
pub struct SessionPool {
    slab: Arc<SlabPool>,
    readers: Arc<BufReaderPool>,
}

impl SessionPool {
    pub fn new(slab: Arc<SlabPool>, readers: Arc<BufReaderPool>) -> Arc<Self> {
        Arc::new(Self { slab, readers })
    }

    /// Shared pool sized for many short-lived client connections.
    pub fn frontend() -> &'static Arc<SessionPool> {
        static POOL: Lazy<Arc<SessionPool>> = Lazy::new(|| {
            SessionPool::new(
                Arc::new(SlabPool::new(512, 4 * 1024, 2, 4 * 1024 * 1024)),
                BufReaderPool::new(10_000, 1024),
            )
        });
        &POOL
    }

    /// Shared pool sized for a few long-lived inter-server links.
    pub fn backend() -> &'static Arc<SessionPool> {
        static POOL: Lazy<Arc<SessionPool>> = Lazy::new(|| {
            SessionPool::new(
                Arc::new(SlabPool::new(512, 32 * 1024, 2, 8 * 1024 * 1024)),
                BufReaderPool::new(1000, 64 * 1024),
            )
        });
        &POOL
    }

    pub fn slab(&self) -> &Arc<SlabPool> {
        &self.slab
    }

    pub fn readers(&self) -> &Arc<BufReaderPool> {
        &self.readers
    }

    /// A packet buffer bound to this pool's slab.
    pub fn new_packet_buffer(&self) -> PacketBuffer {
        PacketBuffer::new(MAX_PACKET_SIZE, Some(Arc::clone(&self.slab)))
    }
}
