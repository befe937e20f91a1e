// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

/// Fixed-class byte-slice arena.
///
/// Buffers are handed out from per-size-class freelists; a request larger
/// than the biggest class falls back to a plain heap allocation, which
/// [`SlabPool::free`] tolerates by simply dropping it. Callers own a buffer
/// from `alloc` until they hand it back with `free`.
pub struct SlabPool {
    min_chunk: usize,
    classes: Vec<SizeClass>,
}

struct SizeClass {
    chunk: usize,
    /// Upper bound on pooled buffers, derived from the per-class byte budget.
    max_free: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl SlabPool {
    /// Builds a pool with chunk classes `min_chunk, min_chunk*factor, ...`
    /// up to and including `max_chunk`. Each class may retain at most
    /// `page_size` bytes worth of free buffers.
    pub fn new(min_chunk: usize, max_chunk: usize, factor: usize, page_size: usize) -> Self {
        debug_assert!(min_chunk > 0 && factor > 1 && max_chunk >= min_chunk);
        let mut classes = Vec::new();
        let mut chunk = min_chunk;
        while chunk <= max_chunk {
            classes.push(SizeClass {
                chunk,
                max_free: (page_size / chunk).max(1),
                free: Mutex::new(Vec::new()),
            });
            chunk *= factor;
        }
        Self { min_chunk, classes }
    }

    /// Returns a zeroed buffer of exactly `size` bytes.
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        let Some(class) = self.class_for(size) else {
            // Oversized request: plain heap allocation, never pooled.
            return vec![0u8; size];
        };
        let mut buf = {
            let mut free = class.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        }
        .unwrap_or_else(|| Vec::with_capacity(class.chunk));
        buf.clear();
        buf.resize(size, 0);
        buf
    }

    /// Returns a buffer to its size class. Buffers that did not come from a
    /// class (heap fallback) or that exceed the class budget are dropped.
    pub fn free(&self, buf: Vec<u8>) {
        let cap = buf.capacity();
        if cap < self.min_chunk {
            return;
        }
        // The largest class fitting the capacity; alloc never shrinks one.
        let Some(class) = self.classes.iter().rev().find(|c| c.chunk <= cap) else {
            return;
        };
        let mut free = class.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < class.max_free {
            free.push(buf);
        }
    }

    fn class_for(&self, size: usize) -> Option<&SizeClass> {
        self.classes.iter().find(|c| c.chunk >= size)
    }
}
