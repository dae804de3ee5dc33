//! CAN bus endpoint.
//!
//! Payloads use the SocketCAN `struct can_frame` layout (16 bytes: id with
//! flag bits, DLC, padding, 8 data bytes) so a bridge to a real interface
//! never has to re-marshal. Send-side pacing models arbitration timing:
//! frame overhead plus data bits plus a 20% worst-case bit-stuffing margin
//! at the configured bitrate.

use std::{collections::VecDeque, io::Cursor, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, trace, warn};
use wirebit_core::{Clock, ErrorKind, MonotonicClock, Result, TimeNs};
use wirebit_frame::{Frame, FrameType};
use wirebit_link::Link;

use crate::endpoint::Endpoint;

/// Extended frame format flag (29-bit id).
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag.
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error frame flag.
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;
/// Standard frame format mask (11-bit id).
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame format mask (29-bit id).
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Serialized size of a CAN frame payload.
pub const CAN_FRAME_SIZE: usize = 16;
/// Maximum data length code.
pub const CAN_MAX_DLC: u8 = 8;

/// A CAN frame in SocketCAN layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// Identifier with EFF/RTR/ERR flags in the high bits.
    pub can_id: u32,
    /// Data length code (0–8).
    pub can_dlc: u8,
    /// Data bytes; only the first `can_dlc` are meaningful.
    pub data: [u8; 8],
}

impl CanFrame {
    /// Builds a standard (11-bit id) data frame. Data beyond 8 bytes is
    /// truncated.
    pub fn standard(id: u32, data: &[u8]) -> Self {
        let mut frame = Self { can_id: id & CAN_SFF_MASK, ..Default::default() };
        frame.set_data(data);
        frame
    }

    /// Builds an extended (29-bit id) data frame. Data beyond 8 bytes is
    /// truncated.
    pub fn extended(id: u32, data: &[u8]) -> Self {
        let mut frame = Self { can_id: (id & CAN_EFF_MASK) | CAN_EFF_FLAG, ..Default::default() };
        frame.set_data(data);
        frame
    }

    /// Builds a remote transmission request with DLC 0.
    pub fn remote(id: u32, extended: bool) -> Self {
        let can_id = if extended {
            (id & CAN_EFF_MASK) | CAN_EFF_FLAG | CAN_RTR_FLAG
        } else {
            (id & CAN_SFF_MASK) | CAN_RTR_FLAG
        };
        Self { can_id, ..Default::default() }
    }

    fn set_data(&mut self, data: &[u8]) {
        let len = data.len().min(CAN_MAX_DLC as usize);
        self.can_dlc = len as u8;
        self.data[..len].copy_from_slice(&data[..len]);
    }

    /// The identifier without flag bits.
    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// True for extended frame format.
    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    /// True for remote transmission requests.
    pub fn is_rtr(&self) -> bool {
        self.can_id & CAN_RTR_FLAG != 0
    }

    /// The meaningful data bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.can_dlc.min(CAN_MAX_DLC) as usize]
    }

    /// Serializes to the 16-byte SocketCAN layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(CAN_FRAME_SIZE);
        bytes.write_u32::<LittleEndian>(self.can_id)?;
        bytes.write_u8(self.can_dlc)?;
        // Padding and reserved bytes.
        bytes.extend_from_slice(&[0u8; 3]);
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    /// Deserializes from the 16-byte SocketCAN layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CAN_FRAME_SIZE {
            return Err(ErrorKind::InvalidArgument(format!(
                "CAN frame payload must be {} bytes: {}",
                CAN_FRAME_SIZE,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let can_id = cursor.read_u32::<LittleEndian>()?;
        let can_dlc = cursor.read_u8()?;
        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[8..16]);
        Ok(Self { can_id, can_dlc, data })
    }
}

/// CAN bus configuration.
#[derive(Clone, Debug)]
pub struct CanConfig {
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Deliver sent frames to this endpoint's own receive buffer too.
    pub loopback: bool,
    /// Refuse to transmit; receive only.
    pub listen_only: bool,
    /// Receive buffer size in frames.
    pub rx_buffer_size: usize,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            loopback: false,
            listen_only: false,
            rx_buffer_size: 100,
        }
    }
}

/// CAN endpoint with bitrate pacing and frame buffering.
pub struct CanEndpoint<L: Link> {
    link: L,
    config: CanConfig,
    endpoint_id: u32,
    rx_buffer: VecDeque<CanFrame>,
    last_tx_deliver_at_ns: TimeNs,
    clock: Arc<dyn Clock>,
}

impl<L: Link> CanEndpoint<L> {
    /// Creates a CAN endpoint owning `link`.
    pub fn new(link: L, config: CanConfig, endpoint_id: u32) -> Result<Self> {
        Self::with_clock(link, config, endpoint_id, Arc::new(MonotonicClock))
    }

    /// Creates a CAN endpoint with an injected clock.
    pub fn with_clock(
        link: L,
        config: CanConfig,
        endpoint_id: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.bitrate == 0 {
            return Err(ErrorKind::InvalidArgument("bitrate must be non-zero".to_string()));
        }
        trace!(endpoint_id, bitrate = config.bitrate, "CAN endpoint created");
        Ok(Self {
            link,
            config,
            endpoint_id,
            rx_buffer: VecDeque::new(),
            last_tx_deliver_at_ns: 0,
            clock,
        })
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &CanConfig {
        &self.config
    }

    /// Shared access to the underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable access to the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Frames waiting in the receive buffer.
    pub fn rx_buffered(&self) -> usize {
        self.rx_buffer.len()
    }

    /// Discards all buffered frames.
    pub fn clear_rx_buffer(&mut self) {
        self.rx_buffer.clear();
    }

    /// Wire time for one frame: overhead + data bits plus a 20% worst-case
    /// bit-stuffing margin at the configured bitrate.
    pub fn frame_time_ns(&self, frame: &CanFrame) -> TimeNs {
        let overhead_bits: u32 = if frame.is_extended() { 67 } else { 47 };
        let mut total_bits = overhead_bits + 8 * frame.can_dlc as u32;
        total_bits += total_bits / 5;
        (total_bits as i64 * 1_000_000_000) / self.config.bitrate as i64
    }

    /// Transmits one CAN frame, pacing it at the bus bitrate.
    pub fn send_can(&mut self, frame: &CanFrame) -> Result<()> {
        if self.config.listen_only {
            return Err(ErrorKind::InvalidArgument(
                "endpoint is listen-only".to_string(),
            ));
        }
        if frame.can_dlc > CAN_MAX_DLC {
            return Err(ErrorKind::InvalidArgument(format!(
                "CAN DLC must be 0-8: {}",
                frame.can_dlc
            )));
        }

        debug!(
            id = frame.id(),
            dlc = frame.can_dlc,
            extended = frame.is_extended(),
            rtr = frame.is_rtr(),
            "CAN send"
        );

        let now = self.clock.now_ns();
        self.last_tx_deliver_at_ns =
            now.max(self.last_tx_deliver_at_ns) + self.frame_time_ns(frame);

        let wire = Frame::with_timestamps(
            FrameType::Can,
            frame.to_bytes()?,
            now,
            self.last_tx_deliver_at_ns,
        )
        .from_endpoint(self.endpoint_id);

        self.link.send(&wire)?;

        if self.config.loopback {
            self.buffer_frame(*frame);
        }
        Ok(())
    }

    /// Pops the oldest received CAN frame, draining the link first.
    pub fn recv_can(&mut self) -> Result<CanFrame> {
        if let Err(e) = self.process() {
            trace!(error = %e, "CAN process found nothing");
        }
        self.rx_buffer
            .pop_front()
            .ok_or(ErrorKind::Timeout("no CAN frames available"))
    }

    fn buffer_frame(&mut self, frame: CanFrame) {
        if self.rx_buffer.len() >= self.config.rx_buffer_size {
            return;
        }
        self.rx_buffer.push_back(frame);
    }

    fn drain_link(&mut self) -> Result<()> {
        while self.rx_buffer.len() < self.config.rx_buffer_size {
            match self.link.recv() {
                Ok(frame) => {
                    if !frame.is_kind(FrameType::Can) {
                        warn!(
                            frame_type = frame.frame_type,
                            "ignoring non-CAN frame on CAN endpoint"
                        );
                        continue;
                    }
                    let can = match CanFrame::from_bytes(&frame.payload) {
                        Ok(can) => can,
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed CAN payload");
                            continue;
                        }
                    };
                    self.rx_buffer.push_back(can);
                }
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            }
        }
        if self.rx_buffer.is_empty() {
            return Err(ErrorKind::Timeout("no CAN frames available"));
        }
        Ok(())
    }
}

impl<L: Link> Endpoint for CanEndpoint<L> {
    /// Sends a serialized 16-byte CAN frame.
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let frame = CanFrame::from_bytes(data)?;
        self.send_can(&frame)
    }

    /// Receives one CAN frame in serialized form.
    fn recv(&mut self) -> Result<Vec<u8>> {
        let frame = self.recv_can()?;
        frame.to_bytes()
    }

    /// Drains CAN frames from the link into the receive FIFO, up to the
    /// configured buffer size.
    fn process(&mut self) -> Result<()> {
        self.drain_link()
    }

    fn name(&self) -> String {
        format!("can_{}", self.endpoint_id)
    }

    fn endpoint_id(&self) -> u32 {
        self.endpoint_id
    }
}

#[cfg(test)]
mod tests {
    use wirebit_core::ManualClock;

    use super::*;

    #[derive(Default)]
    struct LoopbackLink {
        queue: VecDeque<Frame>,
        sent: usize,
    }

    impl Link for LoopbackLink {
        fn send(&mut self, frame: &Frame) -> Result<()> {
            self.sent += 1;
            self.queue.push_back(frame.clone());
            Ok(())
        }
        fn recv(&mut self) -> Result<Frame> {
            self.queue.pop_front().ok_or(ErrorKind::Timeout("empty"))
        }
        fn can_send(&self) -> bool {
            true
        }
        fn can_recv(&self) -> bool {
            !self.queue.is_empty()
        }
        fn name(&self) -> &str {
            "loopback"
        }
    }

    #[test]
    fn constructors_mask_and_flag() {
        let std_frame = CanFrame::standard(0xFFFF_FFFF, &[1, 2]);
        assert_eq!(std_frame.id(), 0x7FF);
        assert!(!std_frame.is_extended());
        assert_eq!(std_frame.can_dlc, 2);

        let ext = CanFrame::extended(0xFFFF_FFFF, &[]);
        assert_eq!(ext.id(), 0x1FFF_FFFF);
        assert!(ext.is_extended());

        let rtr = CanFrame::remote(0x123, false);
        assert!(rtr.is_rtr());
        assert_eq!(rtr.can_dlc, 0);
        assert_eq!(rtr.id(), 0x123);

        let rtr_ext = CanFrame::remote(0x1234_5678, true);
        assert!(rtr_ext.is_rtr());
        assert!(rtr_ext.is_extended());
    }

    #[test]
    fn socketcan_layout_round_trip() {
        let frame = CanFrame::standard(0x42, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), CAN_FRAME_SIZE);
        // id little-endian, then dlc, then 3 reserved bytes, then data.
        assert_eq!(&bytes[0..4], &[0x42, 0, 0, 0]);
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0xDE, 0xAD, 0xBE, 0xEF]);

        assert_eq!(CanFrame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn oversized_dlc_is_rejected_without_sending() {
        let mut endpoint =
            CanEndpoint::new(LoopbackLink::default(), CanConfig::default(), 1).unwrap();
        let bad = CanFrame { can_id: 0x100, can_dlc: 15, data: [0; 8] };
        assert!(matches!(
            endpoint.send_can(&bad),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert_eq!(endpoint.link().sent, 0);
    }

    #[test]
    fn listen_only_refuses_to_send() {
        let config = CanConfig { listen_only: true, ..Default::default() };
        let mut endpoint = CanEndpoint::new(LoopbackLink::default(), config, 1).unwrap();
        assert!(matches!(
            endpoint.send_can(&CanFrame::standard(1, &[0])),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert_eq!(endpoint.link().sent, 0);
    }

    #[test]
    fn frame_time_includes_stuffing_margin() {
        let endpoint = CanEndpoint::new(
            LoopbackLink::default(),
            CanConfig { bitrate: 500_000, ..Default::default() },
            1,
        )
        .unwrap();

        // Standard, 8 data bytes: (47 + 64) * 1.2 = 133 bits (integer math).
        let frame = CanFrame::standard(1, &[0; 8]);
        let bits = (47 + 64) + (47 + 64) / 5;
        assert_eq!(
            endpoint.frame_time_ns(&frame),
            bits as i64 * 1_000_000_000 / 500_000
        );

        // Extended overhead is larger.
        let ext = CanFrame::extended(1, &[0; 8]);
        assert!(endpoint.frame_time_ns(&ext) > endpoint.frame_time_ns(&frame));
    }

    #[test]
    fn send_paces_frames_back_to_back() {
        let clock = Arc::new(ManualClock::new(0));
        let mut endpoint = CanEndpoint::with_clock(
            LoopbackLink::default(),
            CanConfig::default(),
            1,
            clock,
        )
        .unwrap();

        let frame = CanFrame::standard(0x10, &[1, 2, 3, 4]);
        let frame_time = endpoint.frame_time_ns(&frame);
        endpoint.send_can(&frame).unwrap();
        endpoint.send_can(&frame).unwrap();

        let first = endpoint.link_mut().recv().unwrap();
        let second = endpoint.link_mut().recv().unwrap();
        assert_eq!(first.deliver_at_ns, frame_time);
        assert_eq!(second.deliver_at_ns, 2 * frame_time);
    }

    #[test]
    fn round_trip_through_the_endpoint() {
        let mut endpoint =
            CanEndpoint::new(LoopbackLink::default(), CanConfig::default(), 1).unwrap();
        let frame = CanFrame::extended(0xABCDE, &[9, 8, 7]);
        endpoint.send_can(&frame).unwrap();
        assert_eq!(endpoint.recv_can().unwrap(), frame);
        assert!(matches!(
            endpoint.recv_can(),
            Err(ErrorKind::Timeout(_))
        ));
    }

    #[test]
    fn loopback_buffers_own_transmissions() {
        let config = CanConfig { loopback: true, ..Default::default() };
        let mut endpoint = CanEndpoint::new(LoopbackLink::default(), config, 1).unwrap();
        let frame = CanFrame::standard(0x55, &[1]);
        endpoint.send_can(&frame).unwrap();
        // One copy from loopback plus one via the link.
        assert_eq!(endpoint.recv_can().unwrap(), frame);
        assert_eq!(endpoint.recv_can().unwrap(), frame);
    }

    #[test]
    fn malformed_and_foreign_frames_are_skipped() {
        let mut endpoint =
            CanEndpoint::new(LoopbackLink::default(), CanConfig::default(), 1).unwrap();
        // Wrong type.
        let stray = Frame::with_timestamps(FrameType::Serial, vec![1], 1, 0);
        endpoint.link_mut().send(&stray).unwrap();
        // Right type, wrong payload size.
        let malformed = Frame::with_timestamps(FrameType::Can, vec![0; 5], 1, 0);
        endpoint.link_mut().send(&malformed).unwrap();

        assert!(matches!(endpoint.recv_can(), Err(ErrorKind::Timeout(_))));
    }

    /// Link whose receive side has failed with an OS error.
    struct BrokenLink;

    impl Link for BrokenLink {
        fn send(&mut self, _frame: &Frame) -> Result<()> {
            Ok(())
        }
        fn recv(&mut self) -> Result<Frame> {
            Err(ErrorKind::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "wire gone",
            )))
        }
        fn can_send(&self) -> bool {
            true
        }
        fn can_recv(&self) -> bool {
            false
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn io_errors_from_the_link_propagate() {
        let mut endpoint = CanEndpoint::new(BrokenLink, CanConfig::default(), 1).unwrap();
        assert!(matches!(endpoint.process(), Err(ErrorKind::Io(_))));
    }

    #[test]
    fn rx_buffer_is_bounded() {
        let config = CanConfig { rx_buffer_size: 3, ..Default::default() };
        let mut endpoint = CanEndpoint::new(LoopbackLink::default(), config, 1).unwrap();
        for i in 0..5u8 {
            endpoint
                .send_can(&CanFrame::standard(i as u32, &[i]))
                .unwrap();
        }
        endpoint.process().unwrap();
        assert_eq!(endpoint.rx_buffered(), 3);
        // The oldest three made it in; the rest stay on the link.
        assert_eq!(endpoint.recv_can().unwrap().id(), 0);
    }

    #[test]
    fn dlc_validation_happens_before_counters() {
        // The DLC check fires before anything reaches the link, so the
        // link-level statistics see nothing.
        let mut endpoint =
            CanEndpoint::new(LoopbackLink::default(), CanConfig::default(), 1).unwrap();
        let bad = CanFrame { can_id: 1, can_dlc: 9, data: [0; 8] };
        let _ = endpoint.send(&bad.to_bytes().unwrap());
        assert_eq!(endpoint.link().sent, 0);
    }
}
