//! Packet Buffer Pool
//!
//! Fixed-capacity buffers drawn from per-tier pools.
//!
//! # Design
//!
//! - Pre-allocated at startup (no allocation on the hot path)
//! - Lock-free free list (`ArrayQueue`), safe to release from any core
//! - A `PacketBuffer` is moved, never shared: whichever stage holds the
//!   value owns the buffer, and returning it to its pool consumes it
//! - Each buffer remembers the pool (tier) it came from

use crate::error::{CommonError, CommonResult};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default buffer size for receive pools (2KB data + 128B headroom)
pub const RX_BUFFER_SIZE: usize = 2048 + 128;

/// Largest frame we build (jumbo frame without CRC)
pub const MAX_FRAME_SIZE: usize = 9018;

/// Packet buffer
pub struct PacketBuffer {
    /// Backing storage
    data: Box<[u8]>,
    /// Data length
    len: usize,
    /// Pool the buffer belongs to
    pool_id: u8,
    /// Buffer index in pool
    index: u32,
}

impl PacketBuffer {
    fn new(pool_id: u8, index: u32, capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            pool_id,
            index,
        }
    }

    /// Get packet data slice
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get mutable packet data
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Get data length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer capacity
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Set data length, clamped to capacity
    #[inline(always)]
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len.min(self.data.len());
    }

    /// Append data (use tailroom)
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.capacity() - self.len < len {
            return None;
        }
        let start = self.len;
        self.len += len;
        Some(&mut self.data[start..start + len])
    }

    /// Replace contents with `frame`, truncating to capacity
    #[inline]
    pub fn fill_from(&mut self, frame: &[u8]) -> usize {
        let n = frame.len().min(self.capacity());
        self.data[..n].copy_from_slice(&frame[..n]);
        self.len = n;
        n
    }

    /// Reset buffer
    #[inline]
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Pool (tier) this buffer belongs to
    #[inline(always)]
    pub fn pool_id(&self) -> u8 {
        self.pool_id
    }

    /// Get index in pool
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("pool_id", &self.pool_id)
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

/// Buffer pool (pre-allocated, lock-free)
pub struct BufferPool {
    name: String,
    pool_id: u8,
    /// NUMA node the pool was created on, when known
    socket_id: Option<usize>,
    size: usize,
    buffer_size: usize,
    free_list: ArrayQueue<PacketBuffer>,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Create new buffer pool
    ///
    /// Fails when `size` is zero; a zero-capacity free list is a sizing
    /// error, not an empty pool.
    pub fn new(
        name: impl Into<String>,
        pool_id: u8,
        size: usize,
        buffer_size: usize,
    ) -> CommonResult<Self> {
        let name = name.into();
        if size == 0 || buffer_size == 0 {
            return Err(CommonError::PoolSizing {
                pool: name,
                count: size,
                ring_size: 0,
            });
        }

        let free_list = ArrayQueue::new(size);
        for i in 0..size {
            // capacity == size, push cannot fail
            let _ = free_list.push(PacketBuffer::new(pool_id, i as u32, buffer_size));
        }

        Ok(Self {
            name,
            pool_id,
            socket_id: None,
            size,
            buffer_size,
            free_list,
            allocated: AtomicUsize::new(0),
        })
    }

    /// Create a pool that must back a NIC ring of `ring_size` entries
    pub fn for_ring(
        name: impl Into<String>,
        pool_id: u8,
        size: usize,
        buffer_size: usize,
        ring_size: usize,
    ) -> CommonResult<Self> {
        let name = name.into();
        if size < ring_size + crate::POOL_RING_SLACK {
            return Err(CommonError::PoolSizing {
                pool: name,
                count: size,
                ring_size,
            });
        }
        Self::new(name, pool_id, size, buffer_size)
    }

    /// Record the NUMA node backing this pool
    pub fn with_socket(mut self, socket_id: usize) -> Self {
        self.socket_id = Some(socket_id);
        self
    }

    /// Allocate buffer from pool
    #[inline]
    pub fn alloc(&self) -> Option<PacketBuffer> {
        let mut buf = self.free_list.pop()?;
        buf.reset();
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(buf)
    }

    /// Allocate exactly `count` buffers or none
    pub fn alloc_bulk(&self, out: &mut Vec<PacketBuffer>, count: usize) -> CommonResult<()> {
        let start = out.len();
        for _ in 0..count {
            match self.alloc() {
                Some(buf) => out.push(buf),
                None => {
                    for buf in out.drain(start..) {
                        self.free(buf);
                    }
                    return Err(CommonError::PoolExhausted(self.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Free buffer back to pool
    #[inline]
    pub fn free(&self, buf: PacketBuffer) {
        debug_assert_eq!(buf.pool_id, self.pool_id, "buffer returned to foreign pool");
        if self.free_list.push(buf).is_ok() {
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Free every buffer in `bufs`
    pub fn free_bulk(&self, bufs: impl IntoIterator<Item = PacketBuffer>) {
        for buf in bufs {
            self.free(buf);
        }
    }

    /// Get available count
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Get allocated count
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get pool size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity of each buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool id stamped on every buffer
    pub fn pool_id(&self) -> u8 {
        self.pool_id
    }

    /// NUMA node, if recorded
    pub fn socket_id(&self) -> Option<usize> {
        self.socket_id
    }
}
