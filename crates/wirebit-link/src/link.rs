//! The bidirectional link contract.

use wirebit_core::Result;
use wirebit_frame::Frame;

/// A transport carrying frames between two endpoints.
///
/// Links are strictly non-blocking: a full transmit queue and an empty (or
/// not-yet-due) receive queue are both reported as `Timeout`, and the caller
/// decides whether to retry, back off, or abandon. Implementations never
/// retry internally.
pub trait Link {
    /// Sends a frame through the link.
    ///
    /// A frame dropped by an impairment model is still a success: the medium
    /// discarded it, not the API.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Receives one frame, if one is available and due.
    fn recv(&mut self) -> Result<Frame>;

    /// True when the link can accept another frame.
    fn can_send(&self) -> bool;

    /// True when a frame is queued, ignoring delivery timestamps.
    fn can_recv(&self) -> bool;

    /// Link name/identifier.
    fn name(&self) -> &str;
}
