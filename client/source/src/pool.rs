//! Pooled payload buffers.
//!
//! A source checks out exactly one buffer per packet with a non-zero
//! payload and transfers it to the caller inside the packet. Release is
//! RAII: dropping a [`PoolBuffer`] returns its storage to the pool, so
//! checkout and release always pair 1:1 and a buffer can never be read
//! after release.

use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sysview_wire::MAX_PAYLOAD_SIZE;

/// Shared pool of reusable payload buffers.
///
/// Cloning is cheap and shares the pool; checkout and release are safe from
/// multiple sources concurrently.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    outstanding: AtomicUsize,
}

impl PoolInner {
    // The free list holds only plain byte buffers, a poisoned lock cannot
    // leave them in a broken state
    fn free_list(&self) -> MutexGuard<'_, Vec<BytesMut>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PacketPool {
    /// Create a pool whose buffers are pre-sized to `buffer_capacity` bytes
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                buffer_capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Borrow an exclusively-owned buffer of exactly `len` bytes.
    ///
    /// The contents start zeroed. The buffer returns to the pool when
    /// dropped.
    pub fn checkout(&self, len: usize) -> PoolBuffer {
        let mut data = self
            .inner
            .free_list()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));

        data.clear();
        data.resize(len, 0);
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);

        PoolBuffer {
            data,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently checked out
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }
}

impl Default for PacketPool {
    /// Pool sized for the largest payload the protocol allows
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE as usize)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Exclusively-owned buffer borrowed from a [`PacketPool`]
pub struct PoolBuffer {
    data: BytesMut,
    pool: Arc<PoolInner>,
}

impl Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.free_list().push(data);
        self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_release_pairing() {
        let pool = PacketPool::new(1024);
        assert_eq!(pool.outstanding(), 0);

        let buffer = pool.checkout(100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(pool.outstanding(), 1);

        drop(buffer);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_buffers_are_reused() {
        let pool = PacketPool::new(1024);

        let mut buffer = pool.checkout(16);
        buffer[0] = 0xAB;
        drop(buffer);

        // Reused storage comes back zeroed at the requested length
        let buffer = pool.checkout(32);
        assert_eq!(buffer.len(), 32);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pool_is_shared_across_clones() {
        let pool = PacketPool::new(64);
        let clone = pool.clone();

        let buffer = pool.checkout(8);
        assert_eq!(clone.outstanding(), 1);
        drop(buffer);
        assert_eq!(clone.outstanding(), 0);
    }
}
