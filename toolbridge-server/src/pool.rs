use std::ops::{Deref, DerefMut};

use crossbeam::queue::ArrayQueue;

/// Thread-safe bag of reusable buffers.
///
/// Buffers are taken and returned in any order. A buffer returned while the
/// pool already holds `capacity` buffers is dropped, which bounds the memory
/// a pool can pin. A capacity of zero turns pooling off: every take allocates.
#[derive(Debug)]
pub struct BufferPool<T: Reusable> {
    slots: Option<ArrayQueue<T>>,
    shape: T::Shape,
}

/// A buffer type the pool knows how to allocate and reset.
pub trait Reusable: Default {
    type Shape: Copy + std::fmt::Debug;

    fn allocate(shape: Self::Shape) -> Self;

    /// Prepares the buffer for its next borrower. Returns false when the
    /// buffer should not be pooled again.
    fn reset(&mut self, shape: Self::Shape) -> bool;
}

/// Fixed-size byte buffer; the shape is its length.
impl Reusable for Box<[u8]> {
    type Shape = usize;

    fn allocate(len: usize) -> Self {
        vec![0u8; len].into_boxed_slice()
    }

    fn reset(&mut self, len: usize) -> bool {
        self.len() == len
    }
}

/// Growable memory buffer; the shape is the largest capacity worth keeping.
impl Reusable for Vec<u8> {
    type Shape = usize;

    fn allocate(_max_retained: usize) -> Self {
        Vec::new()
    }

    fn reset(&mut self, max_retained: usize) -> bool {
        self.clear();
        self.capacity() <= max_retained
    }
}

pub type BytePool = BufferPool<Box<[u8]>>;
pub type MemoryPool = BufferPool<Vec<u8>>;

impl<T: Reusable> BufferPool<T> {
    pub fn new(capacity: usize, shape: T::Shape) -> Self {
        Self {
            slots: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            shape,
        }
    }

    pub fn take(&self) -> Pooled<'_, T> {
        let buffer = self
            .slots
            .as_ref()
            .and_then(ArrayQueue::pop)
            .unwrap_or_else(|| T::allocate(self.shape));
        Pooled { pool: self, buffer }
    }

    /// Number of idle buffers currently held.
    pub fn retained(&self) -> usize {
        self.slots.as_ref().map_or(0, ArrayQueue::len)
    }

    fn give_back(&self, mut buffer: T) {
        if let Some(slots) = &self.slots {
            if buffer.reset(self.shape) {
                let _ = slots.push(buffer);
            }
        }
    }
}

/// Borrowed buffer that goes back to its pool when dropped.
#[derive(Debug)]
pub struct Pooled<'p, T: Reusable> {
    pool: &'p BufferPool<T>,
    buffer: T,
}

impl<T: Reusable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.buffer
    }
}

impl<T: Reusable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.buffer
    }
}

impl<T: Reusable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        // The default left behind is an empty, unallocated buffer.
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}

/// The two pools shared by every connection of a server.
#[derive(Debug)]
pub struct Pools {
    pub bytes: BytePool,
    pub memory: MemoryPool,
}

impl Pools {
    pub fn new(config: &crate::config::PoolConfig) -> Self {
        Self {
            bytes: BytePool::new(config.max_pooled_buffers, config.request_buffer_bytes),
            memory: MemoryPool::new(
                config.max_pooled_buffers,
                config.max_retained_buffer_bytes,
            ),
        }
    }
}
