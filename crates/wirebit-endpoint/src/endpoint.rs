//! The common endpoint contract.

use wirebit_core::Result;

/// A protocol-aware producer/consumer facing an application.
///
/// The byte-oriented `send`/`recv` pair is the lowest common denominator;
/// the concrete endpoints additionally expose typed operations
/// (`send_can`/`recv_can`, `send_eth`/`recv_eth`) that skip the byte
/// serialization.
pub trait Endpoint {
    /// Sends protocol-specific data.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receives protocol-specific data, if any is buffered or arriving.
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Drains incoming frames from the link into the receive buffer.
    fn process(&mut self) -> Result<()>;

    /// Endpoint name for diagnostics.
    fn name(&self) -> String;

    /// The id stamped into frames this endpoint produces.
    fn endpoint_id(&self) -> u32;
}
