#![warn(missing_docs)]

//! wirebit-ring: lock-free SPSC rings in named shared memory.
//!
//! Two cooperating processes exchange frames through a byte ring whose
//! cursors are single-writer atomics: the producer alone advances `write`,
//! the consumer alone advances `read`, and each publishes with release
//! ordering so the other side's acquire loads always observe fully written
//! bytes. [`FrameRing`] layers self-delimiting records on top so a consumer
//! can recover whole frames without any out-of-band length channel.

/// Self-delimiting frame records over the byte ring.
pub mod frame_ring;
/// POSIX shared-memory region management.
pub mod shm;
/// The SPSC byte ring.
pub mod spsc;

pub use frame_ring::FrameRing;
pub use shm::ShmRegion;
pub use spsc::RingBuffer;
