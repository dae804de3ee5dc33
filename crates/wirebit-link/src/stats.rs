//! Per-link transfer counters.

/// Monotonically increasing totals for one link.
///
/// Counters are single-writer: only the side performing an operation updates
/// them, and they are read without locks. On targets without atomic 64-bit
/// loads a reader may observe a value at most one operation stale, which is
/// acceptable; exact readings are not a correctness property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames handed to `send`, including ones the model later dropped.
    pub frames_sent: u64,
    /// Frames popped from the receive ring.
    pub frames_received: u64,
    /// Frames discarded by the impairment model.
    pub frames_dropped: u64,
    /// Frames duplicated by the impairment model.
    pub frames_duplicated: u64,
    /// Frames whose payload was corrupted by the impairment model.
    pub frames_corrupted: u64,
    /// Total encoded bytes handed to `send`.
    pub bytes_sent: u64,
    /// Total encoded bytes popped from the receive ring.
    pub bytes_received: u64,
    /// Transmit-ring pushes that failed.
    pub send_errors: u64,
    /// Corrupt-record receive failures.
    pub recv_errors: u64,
}

impl LinkStats {
    /// Fraction of sent frames the model dropped (0.0 when nothing was
    /// sent).
    pub fn drop_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / self.frames_sent as f64
    }

    /// Resets all counters to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
