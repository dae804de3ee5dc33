#![warn(missing_docs)]

//! wirebit-endpoint: protocol-aware producers and consumers over a link.
//!
//! An endpoint converts protocol data (serial bytes, CAN messages, Ethernet
//! frames) into wire frames, paces them the way the real medium would, and
//! buffers whatever arrives from the link. Endpoints are single-owner and
//! strictly non-blocking; timing is enforced by comparing the monotonic
//! clock against each frame's delivery timestamp, never by sleeping.

/// CAN bus endpoint and SocketCAN-layout frames.
pub mod can;
/// The common endpoint contract.
pub mod endpoint;
/// Ethernet L2 endpoint, MAC helpers, and frame building.
pub mod eth;
/// Serial byte-stream endpoint.
pub mod serial;

pub use can::{CanConfig, CanEndpoint, CanFrame};
pub use endpoint::Endpoint;
pub use eth::{EthConfig, EthEndpoint, EthHeader, MacAddr};
pub use serial::{Parity, SerialConfig, SerialEndpoint};
