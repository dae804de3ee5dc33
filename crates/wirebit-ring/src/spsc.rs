//! Lock-free single-producer/single-consumer byte ring.
//!
//! The ring lives in a flat region (heap or shared memory) laid out as a
//! [`RingHeader`] followed by the data bytes. Cursors are monotonically
//! increasing byte counts: the producer alone stores `write`, the consumer
//! alone stores `read`, and the buffer index is `cursor % capacity`. With
//! `write - read` giving the exact fill level, the full/empty distinction
//! needs no sacrificial slot.
//!
//! Contract: exactly one producer and one consumer, each in its own thread
//! or process. Cursor publishes use release ordering after the byte copies
//! and cursor reads of the opposite side use acquire ordering, so a consumer
//! that observes an advanced `write` also observes every byte behind it.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use wirebit_core::{ErrorKind, Result};

use crate::shm::ShmRegion;

/// Identifies an initialized ring region ("WRNG").
const RING_MAGIC: u32 = 0x5752_4E47;

/// Region header preceding the ring bytes.
#[repr(C)]
struct RingHeader {
    magic: u32,
    _reserved: u32,
    capacity: u64,
    write: AtomicU64,
    read: AtomicU64,
}

/// Size of the in-region header.
pub const RING_HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

enum Backing {
    // u64 storage keeps the header's atomics 8-byte aligned.
    Heap(Box<[u64]>),
    Shm(ShmRegion),
}

/// SPSC byte ring over a heap or shared-memory region.
pub struct RingBuffer {
    backing: Backing,
    capacity: usize,
}

// The raw region is only touched through the single-writer cursor protocol.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Creates a process-local ring with `capacity` bytes of storage.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ErrorKind::InvalidArgument(
                "ring capacity must be non-zero".to_string(),
            ));
        }
        let words = (RING_HEADER_SIZE + capacity + 7) / 8;
        let storage = vec![0u64; words].into_boxed_slice();
        let mut ring = Self { backing: Backing::Heap(storage), capacity };
        ring.init_header(capacity);
        Ok(ring)
    }

    /// Creates a ring in a fresh named shared-memory object.
    pub fn create_shm(name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ErrorKind::InvalidArgument(
                "ring capacity must be non-zero".to_string(),
            ));
        }
        let region = ShmRegion::create(name, RING_HEADER_SIZE + capacity)?;
        let mut ring = Self { backing: Backing::Shm(region), capacity };
        ring.init_header(capacity);
        debug!(name, capacity, "created shared-memory ring");
        Ok(ring)
    }

    /// Attaches to an existing shared-memory ring, validating its header.
    pub fn attach_shm(name: &str) -> Result<Self> {
        let region = ShmRegion::attach(name)?;
        if region.len() < RING_HEADER_SIZE {
            return Err(ErrorKind::Format(format!(
                "region {:?} too small for a ring header",
                name
            )));
        }

        let header = region.as_ptr() as *const RingHeader;
        let (magic, capacity) = unsafe { ((*header).magic, (*header).capacity as usize) };
        if magic != RING_MAGIC {
            return Err(ErrorKind::Format(format!(
                "region {:?} is not a wirebit ring (magic {:#010x})",
                name, magic
            )));
        }
        if RING_HEADER_SIZE + capacity != region.len() {
            return Err(ErrorKind::InvalidArgument(format!(
                "ring {:?} capacity {} does not match region size {}",
                name,
                capacity,
                region.len()
            )));
        }

        debug!(name, capacity, "attached shared-memory ring");
        Ok(Self { backing: Backing::Shm(region), capacity })
    }

    fn init_header(&mut self, capacity: usize) {
        let header = self.header_mut();
        header.magic = RING_MAGIC;
        header._reserved = 0;
        header.capacity = capacity as u64;
        header.write = AtomicU64::new(0);
        header.read = AtomicU64::new(0);
    }

    fn base_ptr(&self) -> *const u8 {
        match &self.backing {
            Backing::Heap(words) => words.as_ptr() as *const u8,
            Backing::Shm(region) => region.as_ptr(),
        }
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*(self.base_ptr() as *const RingHeader) }
    }

    fn base_mut_ptr(&mut self) -> *mut u8 {
        match &mut self.backing {
            Backing::Heap(words) => words.as_mut_ptr() as *mut u8,
            Backing::Shm(region) => region.as_mut_ptr(),
        }
    }

    fn header_mut(&mut self) -> &mut RingHeader {
        unsafe { &mut *(self.base_mut_ptr() as *mut RingHeader) }
    }

    fn data_ptr(&self) -> *const u8 {
        unsafe { self.base_ptr().add(RING_HEADER_SIZE) }
    }

    fn data_mut_ptr(&mut self) -> *mut u8 {
        unsafe { self.base_mut_ptr().add(RING_HEADER_SIZE) }
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently stored.
    pub fn len(&self) -> usize {
        let header = self.header();
        let write = header.write.load(Ordering::Acquire);
        let read = header.read.load(Ordering::Acquire);
        (write - read) as usize
    }

    /// Bytes of free space.
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// True when no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no byte can be pushed.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Fill level in [0, 1].
    pub fn usage(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    /// Pushes one byte. Fails with `Timeout` when the ring is full.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.push_slice(std::slice::from_ref(&byte))
    }

    /// Pops one byte. Fails with `Timeout` when the ring is empty.
    pub fn pop(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.pop_slice(&mut byte)?;
        Ok(byte[0])
    }

    /// Pushes all of `buf` or nothing, publishing `write` once at the end.
    ///
    /// A wrapped write is performed as at most two contiguous copies.
    pub fn push_slice(&mut self, buf: &[u8]) -> Result<()> {
        let write = {
            let header = self.header();
            let write = header.write.load(Ordering::Relaxed);
            let read = header.read.load(Ordering::Acquire);
            let free = self.capacity - (write - read) as usize;
            if free < buf.len() {
                return Err(ErrorKind::Timeout("ring full"));
            }
            write
        };

        let pos = (write % self.capacity as u64) as usize;
        let first = buf.len().min(self.capacity - pos);
        let data = self.data_mut_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), data.add(pos), first);
            if first < buf.len() {
                std::ptr::copy_nonoverlapping(
                    buf.as_ptr().add(first),
                    data,
                    buf.len() - first,
                );
            }
        }

        self.header()
            .write
            .store(write + buf.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Fills `buf` completely or not at all, publishing `read` once at the
    /// end.
    pub fn pop_slice(&mut self, buf: &mut [u8]) -> Result<()> {
        let read = {
            let header = self.header();
            let read = header.read.load(Ordering::Relaxed);
            let write = header.write.load(Ordering::Acquire);
            let available = (write - read) as usize;
            if available < buf.len() {
                return Err(ErrorKind::Timeout("ring empty"));
            }
            read
        };

        self.copy_out(read, buf);
        self.header()
            .read
            .store(read + buf.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Copies the next `buf.len()` bytes without consuming them.
    ///
    /// Consumer-side only, like [`RingBuffer::pop_slice`].
    pub fn peek_slice(&self, buf: &mut [u8]) -> Result<()> {
        let header = self.header();
        let read = header.read.load(Ordering::Relaxed);
        let write = header.write.load(Ordering::Acquire);
        let available = (write - read) as usize;
        if available < buf.len() {
            return Err(ErrorKind::Timeout("ring empty"));
        }
        self.copy_out(read, buf);
        Ok(())
    }

    fn copy_out(&self, read: u64, buf: &mut [u8]) {
        let pos = (read % self.capacity as u64) as usize;
        let first = buf.len().min(self.capacity - pos);
        let data = self.data_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(data.add(pos), buf.as_mut_ptr(), first);
            if first < buf.len() {
                std::ptr::copy_nonoverlapping(
                    data,
                    buf.as_mut_ptr().add(first),
                    buf.len() - first,
                );
            }
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
