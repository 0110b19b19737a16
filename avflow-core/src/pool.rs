//! Object pools for packet and frame reuse.
//!
//! Pools hand out unreferenced objects and take them back with
//! [`Pool::put`], which drops the payload reference before returning the
//! object to the free list. An object handed out by `get` is owned by
//! exactly one holder; a second holder obtains its own copy through the
//! ref mechanism and returns it independently.

use crate::frame::Frame;
use crate::packet::Packet;
use parking_lot::Mutex;
use std::sync::Arc;

/// Types that can live in a [`Pool`].
pub trait Poolable: Default + Send {
    /// Reset the object to its unreferenced state.
    fn unref(&mut self);
}

impl Poolable for Packet {
    fn unref(&mut self) {
        Packet::unref(self);
    }
}

impl Poolable for Frame {
    fn unref(&mut self) {
        Frame::unref(self);
    }
}

struct PoolInner<T> {
    free: Vec<T>,
    allocated: usize,
}

/// A thread-safe object pool.
///
/// Cloning the pool yields another handle to the same free list.
pub struct Pool<T: Poolable> {
    inner: Arc<Mutex<PoolInner<T>>>,
}

/// Pool of reusable [`Packet`]s.
pub type PacketPool = Pool<Packet>;

/// Pool of reusable [`Frame`]s.
pub type FramePool = Pool<Frame>;

impl<T: Poolable> Pool<T> {
    /// Create a new, empty pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: Vec::new(),
                allocated: 0,
            })),
        }
    }

    /// Acquire an unreferenced object, allocating if the free list is empty.
    pub fn get(&self) -> T {
        let mut inner = self.inner.lock();
        if let Some(obj) = inner.free.pop() {
            obj
        } else {
            inner.allocated += 1;
            T::default()
        }
    }

    /// Unref an object and return it to the free list.
    pub fn put(&self, mut obj: T) {
        obj.unref();
        self.inner.lock().free.push(obj);
    }

    /// Total number of objects ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }

    /// Number of objects currently on the free list.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }
}

impl<T: Poolable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_packet_pool_reuse() {
        let pool = PacketPool::new();

        let pkt = pool.get();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.available(), 0);

        pool.put(pkt);
        assert_eq!(pool.available(), 1);

        let _pkt2 = pool.get();
        assert_eq!(pool.allocated(), 1); // Reused
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_pool_put_unrefs() {
        let pool = PacketPool::new();

        let mut pkt = pool.get();
        pkt.set_data(Bytes::from_static(b"payload"));
        pkt.pts = 7;
        pool.put(pkt);

        let pkt = pool.get();
        assert!(pkt.is_empty());
        assert!(!pkt.has_pts());
    }

    #[test]
    fn test_pool_shared_handles() {
        let pool = FramePool::new();
        let pool2 = pool.clone();

        let frame = pool.get();
        assert_eq!(pool2.available(), 0);

        pool.put(frame);
        assert_eq!(pool2.available(), 1);
        assert_eq!(pool2.allocated(), 1);
    }
}
