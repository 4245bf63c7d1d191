//! Buffer pool for reusing buffers across connections.
//!
//! Buffers grow to the largest packet a connection has seen. Before a buffer
//! set goes back to the pool, any buffer above [`MAX_RETAINED_CAPACITY`] is
//! shrunk so that one huge result does not pin memory for the process lifetime.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

use crate::BufferSet;

const POOL_CAPACITY: usize = 128;

/// Buffers larger than this are shrunk before being pooled.
pub const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

const READ_WRITE_CAPACITY: usize = 8192;
const COLUMN_CAPACITY: usize = 512;

/// Global buffer pool for reusing buffers across connections.
pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A pooled `BufferSet` that returns itself to the pool on drop.
pub struct PooledBufferSet {
    pool: Arc<BufferPool>,
    inner: ManuallyDrop<BufferSet>,
}

impl PooledBufferSet {
    fn new(pool: Arc<BufferPool>, buffer_set: BufferSet) -> Self {
        Self {
            pool,
            inner: ManuallyDrop::new(buffer_set),
        }
    }
}

impl Deref for PooledBufferSet {
    type Target = BufferSet;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBufferSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledBufferSet {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this
        let buffer_set = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.return_buffer_set(buffer_set);
    }
}

/// Buffer pool for reusing `BufferSet` instances across connections.
#[derive(Debug)]
pub struct BufferPool {
    buffer_sets: ArrayQueue<BufferSet>,
}

impl BufferPool {
    /// Create a new buffer pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer_sets: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Get a buffer set from the pool, or create a new one if empty.
    pub fn get_buffer_set(self: &Arc<Self>) -> PooledBufferSet {
        let buffer_set = self.buffer_sets.pop().unwrap_or_default();
        PooledBufferSet::new(Arc::clone(self), buffer_set)
    }

    /// Return a buffer set to the pool.
    pub fn return_buffer_set(&self, mut buffer_set: BufferSet) {
        // Clear buffers but preserve capacity
        buffer_set.read_buffer.clear();
        buffer_set.write_buffer.clear();
        buffer_set.column_buffer.clear();
        buffer_set.sequence_id = 0;

        shrink(&mut buffer_set.read_buffer, READ_WRITE_CAPACITY);
        shrink(&mut buffer_set.write_buffer, READ_WRITE_CAPACITY);
        shrink(&mut buffer_set.column_buffer, COLUMN_CAPACITY);

        // Ignore if pool is full
        let _ = self.buffer_sets.push(buffer_set);
    }

    /// Number of idle buffer sets held by the pool.
    pub fn len(&self) -> usize {
        self.buffer_sets.len()
    }

    /// True if the pool holds no idle buffer sets.
    pub fn is_empty(&self) -> bool {
        self.buffer_sets.is_empty()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}

fn shrink(buf: &mut Vec<u8>, target: usize) {
    if buf.capacity() > MAX_RETAINED_CAPACITY {
        buf.shrink_to(target);
    }
}
