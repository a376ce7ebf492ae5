// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small free-list of scratch byte buffers.
//!
//! Decoders check out a [`PooledBuffer`] for row buffers, IDAT accumulation, or LZW
//! dictionaries, and the buffer is returned to the pool exactly once when the guard is
//! dropped -- on the success path, the error path, or during an unwind.

use std::sync::Mutex;

/// A free-list of reusable scratch buffers, shared by value (clone the `Arc` if you need to
/// share a pool across threads; a fresh `BufferPool` is cheap to create per decode call).
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool { free: Mutex::new(Vec::new()) }
    }

    /// Checks out a buffer with at least `capacity` bytes of capacity, zero-filled to `len`.
    pub fn checkout(&self, len: usize) -> PooledBuffer<'_> {
        let mut buf = self.free.lock().unwrap().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer { buf: Some(buf), pool: self }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().unwrap().push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

/// A checked-out scratch buffer. Returned to its [`BufferPool`] on drop.
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl PooledBuffer<'_> {
    /// Takes ownership of the underlying buffer instead of returning it to the pool. For
    /// scratch that is filled in over the course of a call and then handed to the caller as
    /// the final decoded/encoded byte stream, rather than released back for reuse.
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buf.take().expect("buffer taken before drop")
    }
}
