//! # Send Buffer Pool
//!
//! Object pool for the reusable send regions each connection draws outbound
//! buffers from. Keeps the encrypt-and-frame hot path allocation-free: a
//! region is checked out, filled with one wire frame, queued, written, and
//! returned on drop.
//!
//! The pool grows on demand and never shrinks below its high-water mark;
//! oversized regions (a frame that outgrew the configured capacity) are
//! dropped instead of pooled so one large send cannot pin memory forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A pooled send region that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    shared: Arc<PoolShared>,
}

struct PoolShared {
    regions: Mutex<Vec<Vec<u8>>>,
    region_capacity: usize,
    /// Largest capacity a region may have and still be re-pooled
    max_pooled_capacity: usize,
    high_water: AtomicUsize,
    outstanding: AtomicUsize,
}

impl PooledBuffer {
    /// Get the underlying buffer, consuming this wrapper
    pub fn into_inner(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.shared.outstanding.fetch_sub(1, Ordering::Relaxed);
        if self.buffer.capacity() <= self.shared.max_pooled_capacity {
            self.buffer.clear(); // Clear data but keep capacity
            if let Ok(mut regions) = self.shared.regions.lock() {
                regions.push(std::mem::take(&mut self.buffer));
            }
        }
        // Otherwise, let it be deallocated
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

/// Thread-safe pool of reusable send regions
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool whose regions start at `region_capacity` bytes.
    ///
    /// Regions that grow beyond `max_pooled_capacity` are discarded on
    /// return rather than pooled.
    pub fn new(region_capacity: usize, max_pooled_capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                regions: Mutex::new(Vec::new()),
                region_capacity,
                max_pooled_capacity: max_pooled_capacity.max(region_capacity),
                high_water: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a region from the pool (or allocate a new one if the pool is empty)
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = if let Ok(mut regions) = self.shared.regions.lock() {
            regions
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(self.shared.region_capacity))
        } else {
            Vec::with_capacity(self.shared.region_capacity)
        };

        let live = self.shared.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.high_water.fetch_max(live, Ordering::Relaxed);

        PooledBuffer {
            buffer,
            shared: self.shared.clone(),
        }
    }

    /// Get the current number of idle regions in the pool
    pub fn available(&self) -> usize {
        self.shared.regions.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Most regions ever checked out at once
    pub fn high_water(&self) -> usize {
        self.shared.high_water.load(Ordering::Relaxed)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
