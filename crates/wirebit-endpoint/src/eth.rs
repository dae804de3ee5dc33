//! Ethernet L2 endpoint.
//!
//! Frames are raw L2 bytes: destination MAC, source MAC, big-endian
//! ethertype, payload, zero-padded to the 60-byte minimum. Receive-side
//! filtering keeps only frames addressed to this endpoint's MAC or the
//! broadcast address unless promiscuous mode is on. Send-side pacing charges
//! each frame the preamble and inter-frame gap (20 bytes) on top of its own
//! length at the configured bandwidth.

use std::{collections::VecDeque, sync::Arc};

use tracing::{debug, trace, warn};
use wirebit_core::{Clock, ErrorKind, MonotonicClock, Result, TimeNs};
use wirebit_frame::{Frame, FrameType};
use wirebit_link::Link;

use crate::endpoint::Endpoint;

/// MAC address length.
pub const ETH_ALEN: usize = 6;
/// Ethernet header length (dst + src + ethertype).
pub const ETH_HLEN: usize = 14;
/// Minimum frame size without FCS.
pub const ETH_ZLEN: usize = 60;
/// Maximum payload size (MTU).
pub const ETH_DATA_LEN: usize = 1500;
/// Maximum frame size without FCS.
pub const ETH_FRAME_LEN: usize = 1514;
/// Frame check sequence length.
pub const ETH_FCS_LEN: usize = 4;

/// EtherType: IPv4.
pub const ETH_P_IP: u16 = 0x0800;
/// EtherType: ARP.
pub const ETH_P_ARP: u16 = 0x0806;
/// EtherType: IPv6.
pub const ETH_P_IPV6: u16 = 0x86DD;
/// EtherType: 802.1Q VLAN tag.
pub const ETH_P_8021Q: u16 = 0x8100;

/// Preamble plus inter-frame gap charged per frame on the wire.
const WIRE_OVERHEAD_BYTES: usize = 20;

/// An Ethernet MAC address.
pub type MacAddr = [u8; ETH_ALEN];

/// The broadcast MAC address.
pub const MAC_BROADCAST: MacAddr = [0xFF; ETH_ALEN];

/// Formats a MAC address as `aa:bb:cc:dd:ee:ff`.
pub fn mac_to_string(mac: &MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Parses a MAC address from `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(s: &str) -> Result<MacAddr> {
    let mut mac = [0u8; ETH_ALEN];
    let mut parts = s.split(':');
    for slot in mac.iter_mut() {
        let part = parts.next().ok_or_else(|| {
            ErrorKind::InvalidArgument(format!("bad MAC address: {:?}", s))
        })?;
        *slot = u8::from_str_radix(part, 16)
            .map_err(|_| ErrorKind::InvalidArgument(format!("bad MAC address: {:?}", s)))?;
    }
    if parts.next().is_some() {
        return Err(ErrorKind::InvalidArgument(format!("bad MAC address: {:?}", s)));
    }
    Ok(mac)
}

/// Derives a locally administered MAC address from an endpoint id.
pub fn mac_for_endpoint(endpoint_id: u32) -> MacAddr {
    [
        0x02,
        0x00,
        0x00,
        0x00,
        (endpoint_id >> 8) as u8,
        endpoint_id as u8,
    ]
}

/// Parsed Ethernet header fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthHeader {
    /// Destination MAC address.
    pub dst_mac: MacAddr,
    /// Source MAC address.
    pub src_mac: MacAddr,
    /// EtherType in host order.
    pub ethertype: u16,
}

/// Builds a complete L2 frame, zero-padding to the 60-byte minimum.
pub fn build_eth_frame(
    dst_mac: &MacAddr,
    src_mac: &MacAddr,
    ethertype: u16,
    payload: &[u8],
) -> Vec<u8> {
    let frame_len = (ETH_HLEN + payload.len()).max(ETH_ZLEN);
    let mut frame = Vec::with_capacity(frame_len);
    frame.extend_from_slice(dst_mac);
    frame.extend_from_slice(src_mac);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame.resize(frame_len, 0);
    frame
}

/// Splits a frame into its header and payload.
pub fn parse_eth_frame(frame: &[u8]) -> Result<(EthHeader, &[u8])> {
    if frame.len() < ETH_HLEN {
        return Err(ErrorKind::InvalidArgument(format!(
            "frame too small for Ethernet header: {}",
            frame.len()
        )));
    }
    let mut dst_mac = [0u8; ETH_ALEN];
    dst_mac.copy_from_slice(&frame[0..ETH_ALEN]);
    let mut src_mac = [0u8; ETH_ALEN];
    src_mac.copy_from_slice(&frame[ETH_ALEN..2 * ETH_ALEN]);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    Ok((EthHeader { dst_mac, src_mac, ethertype }, &frame[ETH_HLEN..]))
}

/// Appends the CRC32 frame check sequence, little-endian as on the wire.
pub fn append_fcs(frame: &mut Vec<u8>) {
    let fcs = crc32fast::hash(frame);
    frame.extend_from_slice(&fcs.to_le_bytes());
}

/// Verifies and strips a trailing frame check sequence.
pub fn strip_fcs(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < ETH_HLEN + ETH_FCS_LEN {
        return Err(ErrorKind::InvalidArgument(format!(
            "frame too small to carry an FCS: {}",
            frame.len()
        )));
    }
    let (body, trailer) = frame.split_at(frame.len() - ETH_FCS_LEN);
    let want = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let got = crc32fast::hash(body);
    if want != got {
        return Err(ErrorKind::InvalidArgument(format!(
            "FCS mismatch: {:#010x} != {:#010x}",
            got, want
        )));
    }
    Ok(body)
}

/// Ethernet endpoint configuration.
#[derive(Clone, Debug)]
pub struct EthConfig {
    /// Wire bandwidth in bits per second.
    pub bandwidth_bps: u64,
    /// Receive every frame regardless of destination MAC.
    pub promiscuous: bool,
    /// Receive buffer size in frames; the oldest frame is discarded when a
    /// new one arrives at capacity.
    pub rx_buffer_size: usize,
    /// Append the FCS on send and verify/strip it on receive. Real hardware
    /// does this itself, so bridged traffic normally leaves it off.
    pub calculate_fcs: bool,
}

impl Default for EthConfig {
    fn default() -> Self {
        Self {
            bandwidth_bps: 1_000_000_000,
            promiscuous: false,
            rx_buffer_size: 100,
            calculate_fcs: false,
        }
    }
}

/// Ethernet endpoint with MAC filtering and bandwidth shaping.
pub struct EthEndpoint<L: Link> {
    link: L,
    config: EthConfig,
    endpoint_id: u32,
    mac_addr: MacAddr,
    rx_buffer: VecDeque<Vec<u8>>,
    last_tx_deliver_at_ns: TimeNs,
    clock: Arc<dyn Clock>,
}

impl<L: Link> EthEndpoint<L> {
    /// Creates an Ethernet endpoint owning `link`.
    pub fn new(link: L, config: EthConfig, endpoint_id: u32, mac_addr: MacAddr) -> Result<Self> {
        Self::with_clock(link, config, endpoint_id, mac_addr, Arc::new(MonotonicClock))
    }

    /// Creates an Ethernet endpoint with an auto-generated locally
    /// administered MAC address.
    pub fn with_auto_mac(link: L, config: EthConfig, endpoint_id: u32) -> Result<Self> {
        let mac = mac_for_endpoint(endpoint_id);
        Self::new(link, config, endpoint_id, mac)
    }

    /// Creates an Ethernet endpoint with an injected clock.
    pub fn with_clock(
        link: L,
        config: EthConfig,
        endpoint_id: u32,
        mac_addr: MacAddr,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.bandwidth_bps == 0 {
            return Err(ErrorKind::InvalidArgument(
                "bandwidth must be non-zero".to_string(),
            ));
        }
        debug!(
            endpoint_id,
            mac = %mac_to_string(&mac_addr),
            bandwidth_mbps = config.bandwidth_bps / 1_000_000,
            "Ethernet endpoint created"
        );
        Ok(Self {
            link,
            config,
            endpoint_id,
            mac_addr,
            rx_buffer: VecDeque::new(),
            last_tx_deliver_at_ns: 0,
            clock,
        })
    }

    /// This endpoint's MAC address.
    pub fn mac_addr(&self) -> &MacAddr {
        &self.mac_addr
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &EthConfig {
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

    /// Transmits a complete L2 frame.
    pub fn send_eth(&mut self, eth_frame: &[u8]) -> Result<()> {
        if eth_frame.len() < ETH_HLEN {
            return Err(ErrorKind::InvalidArgument(format!(
                "frame too small for Ethernet header: {}",
                eth_frame.len()
            )));
        }
        if eth_frame.len() > ETH_FRAME_LEN {
            warn!(len = eth_frame.len(), "frame exceeds maximum Ethernet size");
        }

        let (header, payload) = parse_eth_frame(eth_frame)?;
        debug!(
            len = eth_frame.len(),
            dst = %mac_to_string(&header.dst_mac),
            src = %mac_to_string(&header.src_mac),
            ethertype = header.ethertype,
            payload_len = payload.len(),
            "Ethernet send"
        );

        let mut wire_frame = eth_frame.to_vec();
        if self.config.calculate_fcs {
            append_fcs(&mut wire_frame);
        }

        // Preamble and inter-frame gap ride along on the wire.
        let wire_bits = (wire_frame.len() + WIRE_OVERHEAD_BYTES) as i64 * 8;
        let frame_time_ns = wire_bits * 1_000_000_000 / self.config.bandwidth_bps as i64;

        let now = self.clock.now_ns();
        self.last_tx_deliver_at_ns = now.max(self.last_tx_deliver_at_ns) + frame_time_ns;

        let frame = Frame::with_timestamps(
            FrameType::Ethernet,
            wire_frame,
            now,
            self.last_tx_deliver_at_ns,
        )
        .from_endpoint(self.endpoint_id);

        self.link.send(&frame)
    }

    /// Pops the oldest received frame, draining the link first.
    pub fn recv_eth(&mut self) -> Result<Vec<u8>> {
        if let Err(e) = self.process() {
            trace!(error = %e, "Ethernet process found nothing");
        }
        self.rx_buffer
            .pop_front()
            .ok_or(ErrorKind::Timeout("no Ethernet frames available"))
    }

    fn accepts(&self, dst_mac: &MacAddr) -> bool {
        self.config.promiscuous || *dst_mac == self.mac_addr || *dst_mac == MAC_BROADCAST
    }

    fn drain_link(&mut self) -> Result<()> {
        let mut buffered = false;
        loop {
            match self.link.recv() {
                Ok(frame) => {
                    if !frame.is_kind(FrameType::Ethernet) {
                        warn!(
                            frame_type = frame.frame_type,
                            "ignoring non-Ethernet frame on Ethernet endpoint"
                        );
                        continue;
                    }

                    let eth_frame = if self.config.calculate_fcs {
                        match strip_fcs(&frame.payload) {
                            Ok(body) => body.to_vec(),
                            Err(e) => {
                                warn!(error = %e, "dropping frame with bad FCS");
                                continue;
                            }
                        }
                    } else {
                        frame.payload
                    };

                    let header = match parse_eth_frame(&eth_frame) {
                        Ok((header, _)) => header,
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed Ethernet frame");
                            continue;
                        }
                    };

                    if !self.accepts(&header.dst_mac) {
                        trace!(
                            dst = %mac_to_string(&header.dst_mac),
                            "filtered frame for another endpoint"
                        );
                        continue;
                    }

                    if self.rx_buffer.len() >= self.config.rx_buffer_size {
                        warn!("Ethernet receive buffer full, discarding oldest frame");
                        self.rx_buffer.pop_front();
                    }
                    self.rx_buffer.push_back(eth_frame);
                    buffered = true;
                }
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            }
        }
        if !buffered && self.rx_buffer.is_empty() {
            return Err(ErrorKind::Timeout("no Ethernet frames available"));
        }
        Ok(())
    }
}

impl<L: Link> Endpoint for EthEndpoint<L> {
    /// Wraps `data` in a broadcast IPv4 frame from this endpoint's MAC.
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let frame = build_eth_frame(&MAC_BROADCAST, &self.mac_addr, ETH_P_IP, data);
        self.send_eth(&frame)
    }

    /// Receives one complete L2 frame.
    fn recv(&mut self) -> Result<Vec<u8>> {
        self.recv_eth()
    }

    /// Drains Ethernet frames from the link, filtering by destination MAC
    /// unless promiscuous.
    fn process(&mut self) -> Result<()> {
        self.drain_link()
    }

    fn name(&self) -> String {
        format!("eth_{}", self.endpoint_id)
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
    }

    impl Link for LoopbackLink {
        fn send(&mut self, frame: &Frame) -> Result<()> {
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

    const MAC_A: MacAddr = [0x02, 0, 0, 0, 0, 0x02];
    const MAC_B: MacAddr = [0x02, 0, 0, 0, 0, 0x03];

    fn endpoint(config: EthConfig) -> EthEndpoint<LoopbackLink> {
        EthEndpoint::new(LoopbackLink::default(), config, 2, MAC_A).unwrap()
    }

    #[test]
    fn mac_formatting_and_parsing() {
        let mac = parse_mac("02:00:00:00:00:2a").unwrap();
        assert_eq!(mac, [0x02, 0, 0, 0, 0, 0x2A]);
        assert_eq!(mac_to_string(&mac), "02:00:00:00:00:2a");
        assert!(parse_mac("02:00:00").is_err());
        assert!(parse_mac("zz:00:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:2a:ff").is_err());
    }

    #[test]
    fn auto_mac_is_locally_administered() {
        let mac = mac_for_endpoint(0x1234);
        assert_eq!(mac, [0x02, 0, 0, 0, 0x12, 0x34]);
    }

    #[test]
    fn short_frames_are_padded_to_minimum() {
        let frame = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IP, &[1, 2, 3, 4]);
        assert_eq!(frame.len(), ETH_ZLEN);
        let (header, payload) = parse_eth_frame(&frame).unwrap();
        assert_eq!(header.dst_mac, MAC_B);
        assert_eq!(header.src_mac, MAC_A);
        assert_eq!(header.ethertype, ETH_P_IP);
        // Payload keeps the pad; trimming is the consumer's business.
        assert_eq!(payload.len(), ETH_ZLEN - ETH_HLEN);
        assert_eq!(&payload[..4], &[1, 2, 3, 4]);
        assert!(payload[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_payloads_are_not_padded() {
        let frame = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IPV6, &[0xAA; 200]);
        assert_eq!(frame.len(), ETH_HLEN + 200);
    }

    #[test]
    fn padded_frame_survives_the_endpoint_whole() {
        let mut ep = endpoint(EthConfig { promiscuous: true, ..Default::default() });
        let frame = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IP, &[1, 2, 3, 4]);
        ep.send_eth(&frame).unwrap();
        let got = ep.recv_eth().unwrap();
        assert_eq!(got.len(), ETH_ZLEN);
        assert_eq!(got, frame);
    }

    #[test]
    fn undersized_frame_is_rejected() {
        let mut ep = endpoint(EthConfig::default());
        assert!(matches!(
            ep.send_eth(&[0u8; 10]),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn non_promiscuous_filters_by_destination() {
        let mut ep = endpoint(EthConfig::default());

        // One frame for somebody else, one broadcast.
        let other = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IP, b"not-for-us");
        let broadcast = build_eth_frame(&MAC_BROADCAST, &MAC_B, ETH_P_IP, b"for-everyone");
        ep.send_eth(&other).unwrap();
        ep.send_eth(&broadcast).unwrap();

        ep.process().unwrap();
        assert_eq!(ep.rx_buffered(), 1);
        let got = ep.recv_eth().unwrap();
        let (header, _) = parse_eth_frame(&got).unwrap();
        assert_eq!(header.dst_mac, MAC_BROADCAST);
    }

    #[test]
    fn own_mac_passes_the_filter() {
        let mut ep = endpoint(EthConfig::default());
        let for_us = build_eth_frame(&MAC_A, &MAC_B, ETH_P_ARP, b"hello");
        ep.send_eth(&for_us).unwrap();
        assert!(ep.recv_eth().is_ok());
    }

    #[test]
    fn promiscuous_accepts_everything() {
        let mut ep = endpoint(EthConfig { promiscuous: true, ..Default::default() });
        let other = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IP, b"hi");
        ep.send_eth(&other).unwrap();
        assert!(ep.recv_eth().is_ok());
    }

    #[test]
    fn bandwidth_pacing_spaces_frames() {
        // 100 Mbps: a 60-byte frame plus 20 overhead bytes = 640 bits
        // = 6_400 ns on the wire.
        let clock = Arc::new(ManualClock::new(0));
        let config = EthConfig {
            bandwidth_bps: 100_000_000,
            promiscuous: true,
            ..Default::default()
        };
        let mut ep =
            EthEndpoint::with_clock(LoopbackLink::default(), config, 2, MAC_A, clock).unwrap();

        let frame = build_eth_frame(&MAC_B, &MAC_A, ETH_P_IP, &[0; 10]);
        ep.send_eth(&frame).unwrap();
        ep.send_eth(&frame).unwrap();

        let first = ep.link_mut().recv().unwrap();
        let second = ep.link_mut().recv().unwrap();
        assert_eq!(first.deliver_at_ns, 6_400);
        assert_eq!(second.deliver_at_ns, 12_800);
    }

    #[test]
    fn rx_buffer_discards_oldest_on_overflow() {
        let config = EthConfig {
            promiscuous: true,
            rx_buffer_size: 2,
            ..Default::default()
        };
        let mut ep = endpoint(config);
        for tag in [1u8, 2, 3] {
            let frame = build_eth_frame(&MAC_A, &MAC_B, ETH_P_IP, &[tag]);
            ep.send_eth(&frame).unwrap();
        }
        ep.process().unwrap();
        assert_eq!(ep.rx_buffered(), 2);
        // Frame 1 was pushed out; 2 and 3 remain in order.
        let (_, payload) = parse_eth_frame(&ep.recv_eth().unwrap())
            .map(|(h, p)| (h, p.to_vec()))
            .unwrap();
        assert_eq!(payload[0], 2);
    }

    #[test]
    fn fcs_round_trip_and_detection() {
        let config = EthConfig { calculate_fcs: true, promiscuous: true, ..Default::default() };
        let mut ep = endpoint(config);

        let frame = build_eth_frame(&MAC_A, &MAC_B, ETH_P_IP, b"checksummed");
        ep.send_eth(&frame).unwrap();
        // On the wire the frame carries four extra bytes.
        assert_eq!(ep.recv_eth().unwrap(), frame);

        // A corrupted wire frame is dropped.
        ep.send_eth(&frame).unwrap();
        let mut damaged = ep.link_mut().recv().unwrap();
        damaged.payload[20] ^= 0x01;
        ep.link_mut().send(&damaged).unwrap();
        assert!(matches!(ep.recv_eth(), Err(ErrorKind::Timeout(_))));
    }

    #[test]
    fn generic_send_broadcasts_ipv4() {
        let mut ep = endpoint(EthConfig::default());
        ep.send(b"payload").unwrap();
        let wire = ep.link_mut().recv().unwrap();
        let (header, _) = parse_eth_frame(&wire.payload).unwrap();
        assert_eq!(header.dst_mac, MAC_BROADCAST);
        assert_eq!(header.src_mac, MAC_A);
        assert_eq!(header.ethertype, ETH_P_IP);
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
        let mut ep = EthEndpoint::new(BrokenLink, EthConfig::default(), 1, MAC_A).unwrap();
        assert!(matches!(ep.process(), Err(ErrorKind::Io(_))));
    }

    #[test]
    fn foreign_frame_types_are_skipped() {
        let mut ep = endpoint(EthConfig { promiscuous: true, ..Default::default() });
        let stray = Frame::with_timestamps(FrameType::Serial, vec![1], 1, 0);
        ep.link_mut().send(&stray).unwrap();
        assert!(matches!(ep.recv_eth(), Err(ErrorKind::Timeout(_))));
    }
}
