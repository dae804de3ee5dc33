//! Self-delimiting frame records on the byte ring.
//!
//! Record layout: `[u32 record_len][44-byte header][payload][meta][pad]`,
//! zero-padded so `record_len` is a multiple of 8. `record_len` counts the
//! whole aligned record including its own prefix, so a consumer starting at
//! any record boundary knows exactly how far the record extends.
//!
//! Both push and pop publish their cursor exactly once, after the whole
//! record is copied; the peer can never observe a torn frame.

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::warn;
use wirebit_core::{
    constants::{FRAME_HEADER_SIZE, RECORD_ALIGN, RECORD_LEN_SIZE},
    ErrorKind, Result,
};
use wirebit_frame::{codec, Frame};

use crate::spsc::RingBuffer;

/// Smallest legal record: prefix plus header, already 8-byte aligned.
const MIN_RECORD: usize = RECORD_LEN_SIZE + FRAME_HEADER_SIZE;

fn align_record(len: usize) -> usize {
    (len + (RECORD_ALIGN - 1)) & !(RECORD_ALIGN - 1)
}

/// Frame-level operations over an SPSC byte ring.
#[derive(Debug)]
pub struct FrameRing {
    ring: RingBuffer,
}

impl FrameRing {
    /// Creates a process-local frame ring with `capacity` bytes of storage.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self { ring: RingBuffer::with_capacity(capacity)? })
    }

    /// Creates a frame ring in a fresh named shared-memory object.
    pub fn create_shm(name: &str, capacity: usize) -> Result<Self> {
        Ok(Self { ring: RingBuffer::create_shm(name, capacity)? })
    }

    /// Attaches to an existing shared-memory frame ring.
    pub fn attach_shm(name: &str) -> Result<Self> {
        Ok(Self { ring: RingBuffer::attach_shm(name)? })
    }

    /// Appends one frame as a single aligned record.
    ///
    /// Fails with `Timeout` when the free space cannot hold the record,
    /// writing nothing. A frame that can never fit the ring at all is an
    /// `InvalidArgument`.
    pub fn push_frame(&mut self, frame: &Frame) -> Result<()> {
        let record_len = align_record(RECORD_LEN_SIZE + frame.total_size());
        if record_len > self.ring.capacity() {
            return Err(ErrorKind::InvalidArgument(format!(
                "record of {} bytes exceeds ring capacity {}",
                record_len,
                self.ring.capacity()
            )));
        }
        if self.ring.free() < record_len {
            return Err(ErrorKind::Timeout("ring full"));
        }

        let mut record = Vec::with_capacity(record_len);
        record.write_u32::<LittleEndian>(record_len as u32)?;
        codec::encode_into(&mut record, frame)?;
        record.resize(record_len, 0);

        self.ring.push_slice(&record)?;

        let usage = self.ring.usage();
        if usage > 0.8 {
            warn!(usage = (usage * 100.0) as f64, "frame ring nearly full");
        }
        Ok(())
    }

    /// Removes and decodes the next record.
    ///
    /// An empty ring is a `Timeout`. A record whose length prefix is zero,
    /// larger than the ring, or inconsistent with the bytes present is
    /// reported as `InvalidArgument` and left unconsumed: the ring is
    /// considered corrupt and every further pop will re-report it until the
    /// ring is recreated.
    pub fn pop_frame(&mut self) -> Result<Frame> {
        let available = self.ring.len();
        if available == 0 {
            return Err(ErrorKind::Timeout("ring empty"));
        }
        if available < RECORD_LEN_SIZE {
            return Err(ErrorKind::InvalidArgument(
                "corrupt record: truncated length prefix".to_string(),
            ));
        }

        let mut len_bytes = [0u8; RECORD_LEN_SIZE];
        self.ring.peek_slice(&mut len_bytes)?;
        let record_len = u32::from_le_bytes(len_bytes) as usize;

        if record_len < MIN_RECORD || record_len > self.ring.capacity() {
            return Err(ErrorKind::InvalidArgument(format!(
                "corrupt record length: {}",
                record_len
            )));
        }
        if available < record_len {
            return Err(ErrorKind::InvalidArgument(format!(
                "corrupt record: {} bytes announced, {} present",
                record_len, available
            )));
        }

        let mut record = vec![0u8; record_len];
        self.ring.pop_slice(&mut record)?;
        codec::decode(&record[RECORD_LEN_SIZE..])
    }

    /// True when no record is stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// True when not a single further byte fits.
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Capacity of the underlying byte ring.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Bytes of free space.
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    /// Fill level in [0, 1].
    pub fn usage(&self) -> f32 {
        self.ring.usage()
    }
}

#[cfg(test)]
mod tests {
    use wirebit_frame::FrameType;

    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/wirebit_fring_{}_{}", tag, std::process::id())
    }

    fn frame_with_payload(payload: Vec<u8>) -> Frame {
        Frame::with_timestamps(FrameType::Serial, payload, 1_000, 0).from_endpoint(1)
    }

    #[test]
    fn push_pop_round_trip() {
        let mut ring = FrameRing::with_capacity(4096).unwrap();
        let frame = frame_with_payload(vec![1, 2, 3, 4, 5]);

        ring.push_frame(&frame).unwrap();
        assert!(!ring.is_empty());
        // 4 + 44 + 5 = 53 → aligned 56
        assert_eq!(ring.len(), 56);

        let popped = ring.pop_frame().unwrap();
        assert_eq!(popped, frame);
        assert!(ring.is_empty());
    }

    #[test]
    fn records_are_eight_byte_aligned() {
        let mut ring = FrameRing::with_capacity(4096).unwrap();
        for payload_len in 0..16 {
            ring.push_frame(&frame_with_payload(vec![0xAA; payload_len]))
                .unwrap();
            assert_eq!(ring.len() % 8, 0, "payload_len={}", payload_len);
            ring.pop_frame().unwrap();
        }
    }

    #[test]
    fn frames_come_out_in_fifo_order() {
        let mut ring = FrameRing::with_capacity(8192).unwrap();
        for i in 0..10u8 {
            ring.push_frame(&frame_with_payload(vec![i, i + 1, i + 2]))
                .unwrap();
        }
        for i in 0..10u8 {
            let frame = ring.pop_frame().unwrap();
            assert_eq!(frame.payload, vec![i, i + 1, i + 2]);
        }
        assert!(matches!(ring.pop_frame(), Err(ErrorKind::Timeout(_))));
    }

    #[test]
    fn meta_survives_the_ring() {
        let mut ring = FrameRing::with_capacity(1024).unwrap();
        let mut frame = frame_with_payload(vec![1, 2, 3]);
        frame.set_meta(vec![0x55; 7]);
        ring.push_frame(&frame).unwrap();
        assert_eq!(ring.pop_frame().unwrap(), frame);
    }

    #[test]
    fn full_ring_rejects_without_partial_write() {
        let mut ring = FrameRing::with_capacity(128).unwrap();
        let frame = frame_with_payload(vec![0; 40]); // 4+44+40 = 88 aligned
        ring.push_frame(&frame).unwrap();
        let before = ring.len();
        assert!(matches!(
            ring.push_frame(&frame),
            Err(ErrorKind::Timeout(_))
        ));
        assert_eq!(ring.len(), before);
        // The stored frame is intact.
        assert_eq!(ring.pop_frame().unwrap(), frame);
    }

    #[test]
    fn oversized_frame_is_invalid_not_timeout() {
        let mut ring = FrameRing::with_capacity(64).unwrap();
        let frame = frame_with_payload(vec![0; 128]);
        assert!(matches!(
            ring.push_frame(&frame),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn corrupt_record_length_halts_receives() {
        let name = unique_name("corrupt");
        let mut producer = RingBuffer::create_shm(&name, 256).unwrap();
        // A zero length prefix followed by noise.
        producer.push_slice(&[0u8; 16]).unwrap();

        let mut ring = FrameRing { ring: RingBuffer::attach_shm(&name).unwrap() };
        assert!(matches!(
            ring.pop_frame(),
            Err(ErrorKind::InvalidArgument(_))
        ));
        // Cursor untouched: the corruption is reported again.
        assert!(matches!(
            ring.pop_frame(),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert_eq!(ring.len(), 16);
    }

    #[test]
    fn shm_frame_ring_between_mappings() {
        let name = unique_name("duplex");
        let mut tx = FrameRing::create_shm(&name, 1024).unwrap();
        let mut rx = FrameRing::attach_shm(&name).unwrap();

        let frame = frame_with_payload(b"across processes".to_vec());
        tx.push_frame(&frame).unwrap();
        assert_eq!(rx.pop_frame().unwrap(), frame);
    }
}
