//! Fixed-count pool of receive buffers lent to connections.

use std::sync::Mutex;

/// A handle to one lent buffer. Returned by [`BufferPool::get`]; pass back to
/// [`BufferPool::release`] when the owning CCB transitions to `CLOSED`.
pub type BufferHandle = usize;

struct Inner {
    buffers: Vec<Box<[u8]>>,
    free: Vec<BufferHandle>,
}

/// Fixed-size arena of `capacity`-byte regions, lent by index rather than by pointer.
///
/// No per-connection growth: `slots` equals the maximum number of simultaneously non-`CLOSED`
/// connections (`Config::max_connections`). Allocation never blocks — it fails fast with `None`
/// when the pool is exhausted, and the caller maps that to [`crate::error::TcpErrorKind::NoMemory`].
pub struct BufferPool {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(slots: usize, capacity: usize) -> Self {
        let buffers = (0..slots).map(|_| vec![0u8; capacity].into_boxed_slice()).collect();
        let free = (0..slots).rev().collect();
        BufferPool {
            inner: Mutex::new(Inner { buffers, free }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking allocation; `None` means "all buffers in use".
    pub fn get(&self) -> Option<BufferHandle> {
        self.inner.lock().unwrap().free.pop()
    }

    /// Idempotent in the sense that releasing an already-free handle is a caller bug, not UB —
    /// but callers only ever release a handle they hold exactly once, at `CLOSED` transition.
    pub fn release(&self, handle: BufferHandle) {
        self.inner.lock().unwrap().free.push(handle);
    }

    pub fn with_buffer<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.buffers[handle])
    }

    /// Writes as much of `data` as fits into the lent buffer's remaining room, treating it as a
    /// ring indexed by `read`/`fill` byte counters (both monotonically increasing, never
    /// wrapped themselves — only the index into the buffer wraps). Returns the number written.
    pub fn ring_write(&self, handle: BufferHandle, read: usize, fill: &mut usize, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(*fill - read);
        let n = data.len().min(room);
        if n == 0 {
            return 0;
        }
        let cap = self.capacity;
        self.with_buffer(handle, |buf| {
            for (i, &b) in data[..n].iter().enumerate() {
                buf[(*fill + i) % cap] = b;
            }
        });
        *fill += n;
        n
    }

    /// Reads up to `out.len()` bytes starting at `read`, advancing `read` by however many were
    /// actually available. Returns the number read.
    pub fn ring_read(&self, handle: BufferHandle, read: &mut usize, fill: usize, out: &mut [u8]) -> usize {
        let available = fill - *read;
        let n = out.len().min(available);
        if n == 0 {
            return 0;
        }
        let cap = self.capacity;
        self.with_buffer(handle, |buf| {
            for (i, slot) in out[..n].iter_mut().enumerate() {
                *slot = buf[(*read + i) % cap];
            }
        });
        *read += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_recovers() {
        let pool = BufferPool::new(2, 16);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(pool.get().is_none(), "pool should report exhaustion, not allocate a third slot");

        pool.release(a);
        assert!(pool.get().is_some());
        pool.release(b);
    }

    #[test]
    fn ring_write_stops_at_capacity_and_ring_read_wraps() {
        let pool = BufferPool::new(1, 4);
        let handle = pool.get().unwrap();
        let (mut read, mut fill) = (0usize, 0usize);

        assert_eq!(pool.ring_write(handle, read, &mut fill, b"abcdef"), 4, "write clamps to the buffer's capacity");

        let mut out = [0u8; 2];
        assert_eq!(pool.ring_read(handle, &mut read, fill, &mut out), 2);
        assert_eq!(&out, b"ab");

        // Two bytes were freed by the read above: a wrapped write should fill them in.
        assert_eq!(pool.ring_write(handle, read, &mut fill, b"xy"), 2);
        let mut out = [0u8; 4];
        assert_eq!(pool.ring_read(handle, &mut read, fill, &mut out), 4);
        assert_eq!(&out, b"cdxy");
    }

    #[test]
    fn buffers_are_independently_addressable() {
        let pool = BufferPool::new(2, 4);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        pool.with_buffer(a, |buf| buf.copy_from_slice(b"aaaa"));
        pool.with_buffer(b, |buf| buf.copy_from_slice(b"bbbb"));
        pool.with_buffer(a, |buf| assert_eq!(buf, b"aaaa"));
    }
}
