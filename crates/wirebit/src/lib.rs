#![warn(missing_docs)]

//! Wirebit: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to simulate wire-level links between processes:
//!
//! - Frames and the wire format (`Frame`, `FrameType`)
//! - Links, impairment, and statistics (`ShmLink`, `LinkModel`, `LinkStats`)
//! - Protocol endpoints (`SerialEndpoint`, `CanEndpoint`, `EthEndpoint`)
//!
//! Example
//! ```no_run
//! use wirebit::{CanConfig, CanEndpoint, CanFrame, LinkModel, ShmLink};
//!
//! // Server side: create the link with 50 us of latency.
//! let model = LinkModel { base_latency_ns: 50_000, ..Default::default() };
//! let link = ShmLink::create("bus0", 64 * 1024, Some(model)).unwrap();
//! let mut node = CanEndpoint::new(link, CanConfig::default(), 1).unwrap();
//!
//! node.send_can(&CanFrame::standard(0x123, &[0xDE, 0xAD])).unwrap();
//!
//! // A cooperating process attaches with ShmLink::attach("bus0", None)
//! // and reads the frame with recv_can().
//! ```

// Core: errors, time, deterministic RNG
pub use wirebit_core::{
    Clock, DeterministicRng, ErrorKind, ManualClock, MonotonicClock, Result, TimeNs,
};
// Frames and wire format
pub use wirebit_frame::{codec, Frame, FrameType};
// Rings: shared-memory transport building blocks
pub use wirebit_ring::{FrameRing, RingBuffer, ShmRegion};
// Links: transport + impairment
pub use wirebit_link::{FrameAction, Link, LinkModel, LinkStats, ShmLink};
// Endpoints: serial, CAN, Ethernet
pub use wirebit_endpoint::{
    eth::{build_eth_frame, mac_to_string, parse_eth_frame, parse_mac, MAC_BROADCAST},
    CanConfig, CanEndpoint, CanFrame, Endpoint, EthConfig, EthEndpoint, EthHeader, MacAddr,
    Parity, SerialConfig, SerialEndpoint,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        CanConfig, CanEndpoint, CanFrame, Endpoint, ErrorKind, EthConfig, EthEndpoint, Frame,
        FrameType, Link, LinkModel, LinkStats, Parity, Result, SerialConfig, SerialEndpoint,
        ShmLink, TimeNs,
    };
}
