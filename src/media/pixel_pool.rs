// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-capacity pool of CPU pixel buffers
//!
//! The movie sink reads every accepted frame back into a buffer from this
//! pool. Buffers are handed to the encoder by value and find their way home
//! when the encoder drops them, so the number of frames in flight is bounded
//! by the pool capacity. Buffers are allocated lazily, up to capacity.

use crate::constants::graph::BYTES_PER_PIXEL;
use crate::graph::Timestamp;
use crate::handoff_queue::lock_recovering;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

struct PoolInner {
    width: u32,
    height: u32,
    capacity: usize,
    /// Free buffers plus how many have been allocated in total
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    allocated: usize,
}

impl PoolInner {
    fn buffer_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL as usize
    }
}

/// Pool of tightly packed RGBA buffers of one size
#[derive(Clone)]
pub struct PixelBufferPool {
    inner: Arc<PoolInner>,
}

impl PixelBufferPool {
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                width,
                height,
                capacity,
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    allocated: 0,
                }),
            }),
        }
    }

    /// Take a buffer, or `None` when every buffer is in use
    pub fn acquire(&self) -> Option<PixelBuffer> {
        let mut state = lock_recovering(&self.inner.state);
        let data = match state.free.pop() {
            Some(data) => data,
            None if state.allocated < self.inner.capacity => {
                state.allocated += 1;
                trace!(allocated = state.allocated, "Pixel buffer allocated");
                vec![0; self.inner.buffer_len()]
            }
            None => return None,
        };

        Some(PixelBuffer {
            data,
            width: self.inner.width,
            height: self.inner.height,
            pool: Arc::downgrade(&self.inner),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers that can be acquired right now
    pub fn available(&self) -> usize {
        let state = lock_recovering(&self.inner.state);
        state.free.len() + (self.inner.capacity - state.allocated)
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.inner.width as usize * BYTES_PER_PIXEL as usize
    }
}

impl fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A pooled RGBA buffer, returned to its pool on drop
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pool: Weak<PoolInner>,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL as usize
    }
}

impl AsRef<[u8]> for PixelBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for PixelBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelBuffer({}x{})", self.width, self.height)
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        // Pool already gone: the memory is simply freed
        if let Some(pool) = self.pool.upgrade() {
            let data = std::mem::take(&mut self.data);
            lock_recovering(&pool.state).free.push(data);
        }
    }
}

/// A read-back video frame waiting for the encoder
#[derive(Debug)]
pub struct VideoFrame {
    pub buffer: PixelBuffer,
    pub time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_and_return() {
        let pool = PixelBufferPool::new(4, 2, 2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a.as_ref().len(), 32);
        assert!(pool.acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().unwrap();
        assert_eq!(c.bytes_per_row(), 16);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_outlives_pool() {
        let pool = PixelBufferPool::new(2, 2, 1);
        let buffer = pool.acquire().unwrap();
        drop(pool);
        drop(buffer);
    }
}
