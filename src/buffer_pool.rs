//! Bounded reuse pools for frame buffers.
//!
//! Pools never block: [`BufferPool::acquire`] allocates when nothing is
//! pooled, and [`BufferPool::release`] drops the value when the pool is full.
//! Pools are plain values, shared with `Arc` by whoever needs them.

use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::queue::ArrayQueue;

use crate::frame::Frame;

/// Number of entries kept by [`BufferPool::default`].
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// A value that can be recycled through a [`BufferPool`].
pub trait Recycle: Send {
    /// Allocates a fresh value able to hold `size` bytes.
    fn allocate(size: usize) -> Self;

    /// Prepares a pooled value for reuse with `size` bytes, growing its
    /// storage in place when needed.
    fn reset(&mut self, size: usize);
}

impl Recycle for Frame {
    fn allocate(size: usize) -> Self {
        let mut frame = Frame::with_capacity(size);
        frame.resize(size);
        frame
    }

    fn reset(&mut self, size: usize) {
        self.clear();
        self.resize(size);
    }
}

/// A frame paired with the time it was captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampedFrame {
    pub time: SystemTime,
    pub frame: Frame,
}

impl Recycle for TimestampedFrame {
    fn allocate(size: usize) -> Self {
        Self {
            time: UNIX_EPOCH,
            frame: Frame::allocate(size),
        }
    }

    fn reset(&mut self, size: usize) {
        self.time = UNIX_EPOCH;
        self.frame.reset(size);
    }
}

#[derive(Debug)]
pub struct BufferPool<T> {
    free_list: ArrayQueue<T>,
}

pub type FramePool = BufferPool<Frame>;
pub type TimestampedFramePool = BufferPool<TimestampedFrame>;

impl<T: Recycle> BufferPool<T> {
    /// Creates an empty pool retaining at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            free_list: ArrayQueue::new(capacity),
        }
    }

    /// Returns a value sized to `size` bytes, reusing a pooled one if any is
    /// immediately available.
    pub fn acquire(&self, size: usize) -> T {
        match self.free_list.pop() {
            Some(mut value) => {
                value.reset(size);
                value
            }
            None => T::allocate(size),
        }
    }

    /// Hands `value` back for reuse. Dropped if the pool is full.
    pub fn release(&self, value: T) {
        // full pool: let it go
        let _ = self.free_list.push(value);
    }

    /// Number of values currently pooled.
    pub fn len(&self) -> usize {
        self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.free_list.capacity()
    }
}

impl<T: Recycle> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses_storage() {
        let pool = FramePool::new(4);
        let frame = pool.acquire(1514);
        assert_eq!(frame.len(), 1514);
        let ptr = frame.as_ptr();

        pool.release(frame);
        assert_eq!(pool.len(), 1);

        let again = pool.acquire(64);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(again.len(), 64);
        assert!(again.capacity() >= 1514);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_acquire_grows_small_buffer() {
        let pool = FramePool::new(4);
        pool.release(Frame::allocate(16));

        let frame = pool.acquire(9000);
        assert_eq!(frame.len(), 9000);
        assert!(frame.capacity() >= 9000);
    }

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = FramePool::new(2);
        let a = pool.acquire(100);
        let b = pool.acquire(100);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_release_drops_when_full() {
        let pool = FramePool::new(2);
        for _ in 0..5 {
            pool.release(Frame::allocate(32));
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_timestamped_reset() {
        let pool = TimestampedFramePool::default();
        let mut entry = pool.acquire(60);
        entry.time = SystemTime::now();
        entry.frame[0] = 0xff;
        pool.release(entry);

        let entry = pool.acquire(60);
        assert_eq!(entry.time, UNIX_EPOCH);
        assert_eq!(entry.frame[0], 0);
        assert_eq!(pool.capacity(), DEFAULT_POOL_CAPACITY);
    }

    #[test]
    fn test_shared_between_threads() {
        let pool = std::sync::Arc::new(FramePool::new(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let frame = pool.acquire(128);
                        pool.release(frame);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.len() <= 8);
    }
}
