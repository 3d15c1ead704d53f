//! Reusable read-buffer pool.
//!
//! The reactor leases a fixed-size buffer before every socket read and the
//! worker lane releases it once the codec has consumed the bytes. Release
//! happens in the lease guard's `Drop`, so every exit path returns the
//! buffer, decode errors included.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
}

/// Pool of fixed-size byte buffers keyed by one allocation size.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::new()),
                buffer_size,
            }),
        }
    }

    /// Lease a cleared buffer sized to the pool's allocation size. The
    /// buffer returns to the pool when the guard drops.
    pub fn lease(&self) -> PooledBuffer {
        let buf = self
            .inner
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_size));
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

/// Scoped lease over one pooled buffer.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.pool.buffers.lock().push(buf);
    }
}
