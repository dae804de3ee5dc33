//! Frame and frame-type definitions.

use std::convert::TryFrom;

use wirebit_core::{
    constants::FRAME_HEADER_SIZE,
    time::{now_ns, TimeNs},
    ErrorKind,
};

/// Identifies the protocol a frame's payload belongs to.
///
/// The wire field is a `u16`; values outside this enum are reserved and pass
/// through decode untouched so future protocols can share a link with
/// current ones.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub enum FrameType {
    /// Single byte of a serial stream.
    Serial = 1,
    /// CAN bus frame (SocketCAN payload layout).
    Can = 2,
    /// Ethernet L2 frame.
    Ethernet = 3,
    /// IP L3 packet.
    Ip = 4,
}

impl FrameType {
    /// Returns the wire value for this frame type.
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for FrameType {
    type Error = ErrorKind;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::Serial),
            2 => Ok(FrameType::Can),
            3 => Ok(FrameType::Ethernet),
            4 => Ok(FrameType::Ip),
            other => Err(ErrorKind::InvalidArgument(format!(
                "unknown frame type: {}",
                other
            ))),
        }
    }
}

/// The indivisible unit carried on every link.
///
/// `magic` and `version` are implicit: they are emitted by the encoder and
/// gated by the decoder, and never stored here. `flags` is reserved and must
/// be zero on encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Wire value of the frame type (see [`FrameType`]).
    pub frame_type: u16,
    /// Reserved flag bits; zero on every frame this layer produces.
    pub flags: u32,
    /// Monotonic time at which the sender produced the frame.
    pub tx_timestamp_ns: TimeNs,
    /// Earliest time the receiver may surface the frame; 0 means immediate.
    pub deliver_at_ns: TimeNs,
    /// Opaque sender endpoint id.
    pub src_endpoint_id: u32,
    /// Opaque destination endpoint id; 0 means broadcast.
    pub dst_endpoint_id: u32,
    /// Protocol payload bytes.
    pub payload: Vec<u8>,
    /// Optional metadata bytes.
    pub meta: Vec<u8>,
}

impl Frame {
    /// Creates a frame stamped with the current monotonic time.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self::with_timestamps(frame_type, payload, now_ns(), 0)
    }

    /// Creates a frame with explicit transmission and delivery timestamps.
    pub fn with_timestamps(
        frame_type: FrameType,
        payload: Vec<u8>,
        tx_timestamp_ns: TimeNs,
        deliver_at_ns: TimeNs,
    ) -> Self {
        Self {
            frame_type: frame_type.to_u16(),
            flags: 0,
            tx_timestamp_ns,
            deliver_at_ns,
            src_endpoint_id: 0,
            dst_endpoint_id: 0,
            payload,
            meta: Vec::new(),
        }
    }

    /// Sets the source endpoint id, builder style.
    pub fn from_endpoint(mut self, src_endpoint_id: u32) -> Self {
        self.src_endpoint_id = src_endpoint_id;
        self
    }

    /// Sets the destination endpoint id, builder style. 0 is broadcast.
    pub fn to_endpoint(mut self, dst_endpoint_id: u32) -> Self {
        self.dst_endpoint_id = dst_endpoint_id;
        self
    }

    /// Returns the typed frame kind, failing on reserved values.
    pub fn kind(&self) -> wirebit_core::Result<FrameType> {
        FrameType::try_from(self.frame_type)
    }

    /// Returns true if this frame matches `frame_type`.
    pub fn is_kind(&self, frame_type: FrameType) -> bool {
        self.frame_type == frame_type.to_u16()
    }

    /// Returns true if the destination is the broadcast id.
    pub fn is_broadcast(&self) -> bool {
        self.dst_endpoint_id == 0
    }

    /// Replaces the metadata section.
    pub fn set_meta(&mut self, meta: Vec<u8>) {
        self.meta = meta;
    }

    /// Total encoded size: header plus payload plus metadata.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len() + self.meta.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_round_trips_through_u16() {
        for ft in [
            FrameType::Serial,
            FrameType::Can,
            FrameType::Ethernet,
            FrameType::Ip,
        ] {
            assert_eq!(FrameType::try_from(ft.to_u16()).unwrap(), ft);
        }
        assert!(FrameType::try_from(0).is_err());
        assert!(FrameType::try_from(999).is_err());
    }

    #[test]
    fn new_frame_is_stamped_and_immediate() {
        let frame = Frame::new(FrameType::Serial, vec![0x41]);
        assert!(frame.tx_timestamp_ns > 0);
        assert_eq!(frame.deliver_at_ns, 0);
        assert_eq!(frame.flags, 0);
        assert!(frame.is_broadcast());
        assert!(frame.is_kind(FrameType::Serial));
    }

    #[test]
    fn total_size_counts_all_sections() {
        let mut frame = Frame::with_timestamps(FrameType::Can, vec![0; 16], 1, 0);
        assert_eq!(frame.total_size(), 44 + 16);
        frame.set_meta(vec![0; 10]);
        assert_eq!(frame.total_size(), 44 + 16 + 10);
    }

    #[test]
    fn endpoint_builders() {
        let frame = Frame::new(FrameType::Ethernet, vec![])
            .from_endpoint(7)
            .to_endpoint(9);
        assert_eq!(frame.src_endpoint_id, 7);
        assert_eq!(frame.dst_endpoint_id, 9);
        assert!(!frame.is_broadcast());
    }
}
