//! Shared pool of fixed-capacity byte buffers.
//!
//! Sessions lease buffers with [`BufferPool::borrow`] and hand them back by
//! dropping the [`Buffer`] handle (or explicitly with
//! [`BufferPool::give_back`]). A handle can only be returned once and cannot
//! be touched after it has been returned, since returning consumes it.
//!
//! # Design
//!
//! - Idle buffers sit in a `Mutex<Vec<_>>`; the lock is held only for a push/pop
//! - An empty pool allocates a fresh buffer instead of blocking
//! - Only buffers of the pool's capacity are retained; an optional retention
//!   cap frees the surplus
//! - Counters track every borrow, return and allocation for leak checks
//!
//! # Example
//!
//! ```
//! use framewire::buffer::BufferPool;
//!
//! let pool = BufferPool::new(4096, 2);
//! let buf = pool.borrow();
//! assert_eq!(buf.capacity(), 4096);
//! pool.give_back(buf);
//! assert_eq!(pool.stats().outstanding(), 0);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe pool of byte buffers of one fixed capacity.
///
/// Cheap to clone; clones share the same idle list and counters.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

struct Shared {
    /// Capacity of every pooled buffer.
    capacity: usize,
    /// Idle buffers ready for reuse.
    idle: Mutex<Vec<Box<[u8]>>>,
    /// Maximum idle buffers kept (`None` = unbounded).
    max_idle: Option<usize>,
    borrowed: AtomicU64,
    returned: AtomicU64,
    allocated: AtomicU64,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out by `borrow`.
    pub borrowed: u64,
    /// Pooled buffers that came back (retained or freed).
    pub returned: u64,
    /// Fresh allocations made by the pool, including prefill.
    pub allocated: u64,
    /// Buffers currently idle in the pool.
    pub available: usize,
}

impl PoolStats {
    /// Buffers borrowed but not yet returned.
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.borrowed - self.returned
    }
}

impl BufferPool {
    /// Create a pool of `capacity`-byte buffers with `initial` buffers prefilled.
    pub fn new(capacity: usize, initial: usize) -> Self {
        Self::with_max_idle(capacity, initial, None)
    }

    /// Create a pool that keeps at most `max_idle` idle buffers.
    pub fn with_max_idle(capacity: usize, initial: usize, max_idle: Option<usize>) -> Self {
        let prefill = max_idle.map_or(initial, |max| initial.min(max));
        let idle: Vec<Box<[u8]>> = (0..prefill).map(|_| alloc(capacity)).collect();

        Self {
            shared: Arc::new(Shared {
                capacity,
                idle: Mutex::new(idle),
                max_idle,
                borrowed: AtomicU64::new(0),
                returned: AtomicU64::new(0),
                allocated: AtomicU64::new(prefill as u64),
            }),
        }
    }

    /// Capacity of buffers handed out by this pool.
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Lease a buffer, allocating a new one when no idle buffer is available.
    ///
    /// Content of a reused buffer is whatever its previous user left in it.
    pub fn borrow(&self) -> Buffer {
        let recycled = self.shared.lock_idle().pop();
        let data = recycled.unwrap_or_else(|| {
            self.shared.allocated.fetch_add(1, Ordering::Relaxed);
            alloc(self.shared.capacity)
        });
        self.shared.borrowed.fetch_add(1, Ordering::Relaxed);

        Buffer {
            data,
            home: Some(self.shared.clone()),
        }
    }

    /// Return a buffer for reuse.
    ///
    /// Equivalent to dropping it. Buffers from another pool go back to their
    /// own pool; dedicated buffers are freed.
    #[inline]
    pub fn give_back(&self, buf: Buffer) {
        drop(buf);
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            borrowed: self.shared.borrowed.load(Ordering::Relaxed),
            returned: self.shared.returned.load(Ordering::Relaxed),
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            available: self.shared.lock_idle().len(),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn lock_idle(&self) -> MutexGuard<'_, Vec<Box<[u8]>>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reclaim(&self, data: Box<[u8]>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        if data.len() != self.capacity {
            return;
        }
        let mut idle = self.lock_idle();
        if self.max_idle.map_or(true, |max| idle.len() < max) {
            idle.push(data);
        }
    }
}

fn alloc(len: usize) -> Box<[u8]> {
    vec![0u8; len].into_boxed_slice()
}

/// Owned byte buffer, either leased from a [`BufferPool`] or dedicated.
///
/// A leased buffer goes back to its pool when dropped.
pub struct Buffer {
    data: Box<[u8]>,
    home: Option<Arc<Shared>>,
}

impl Buffer {
    /// Allocate a buffer that belongs to no pool.
    pub fn dedicated(len: usize) -> Self {
        Self {
            data: alloc(len),
            home: None,
        }
    }

    /// Fixed capacity of this buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whether dropping this buffer returns it to a pool.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.reclaim(std::mem::take(&mut self.data));
        }
    }
}
