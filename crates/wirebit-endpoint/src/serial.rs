//! Serial byte-stream endpoint.
//!
//! Every byte travels as its own SERIAL frame, paced at the configured UART
//! timing: start bit + data bits + optional parity bit + stop bits at the
//! given baud rate. The pacing state is a single monotone counter, so bytes
//! serialize on the wire exactly like a real port.

use std::{collections::VecDeque, sync::Arc};

use tracing::{trace, warn};
use wirebit_core::{Clock, ErrorKind, MonotonicClock, Result, TimeNs};
use wirebit_frame::{Frame, FrameType};
use wirebit_link::Link;

use crate::endpoint::Endpoint;

/// UART parity setting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Serial port configuration.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    /// Baud rate in bits per second.
    pub baud: u32,
    /// Data bits per character (5–8).
    pub data_bits: u8,
    /// Stop bits per character (1 or 2).
    pub stop_bits: u8,
    /// Parity setting.
    pub parity: Parity,
    /// Maximum bytes returned by one `recv` call.
    pub max_chunk_read: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            max_chunk_read: 256,
        }
    }
}

impl SerialConfig {
    /// Bits on the wire per character: start + data + parity + stop.
    pub fn bits_per_byte(&self) -> u32 {
        let parity = if self.parity == Parity::None { 0 } else { 1 };
        1 + self.data_bits as u32 + parity + self.stop_bits as u32
    }

    /// Wire time of one character at the configured baud rate.
    pub fn byte_time_ns(&self) -> TimeNs {
        (self.bits_per_byte() as i64 * 1_000_000_000) / self.baud as i64
    }

    fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            return Err(ErrorKind::InvalidArgument("baud must be non-zero".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ErrorKind::InvalidArgument(format!(
                "data bits must be 5-8: {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ErrorKind::InvalidArgument(format!(
                "stop bits must be 1 or 2: {}",
                self.stop_bits
            )));
        }
        if self.max_chunk_read == 0 {
            return Err(ErrorKind::InvalidArgument(
                "max_chunk_read must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Byte-stream endpoint paced by UART framing.
pub struct SerialEndpoint<L: Link> {
    link: L,
    config: SerialConfig,
    endpoint_id: u32,
    rx_buffer: VecDeque<u8>,
    last_tx_deliver_at_ns: TimeNs,
    clock: Arc<dyn Clock>,
}

impl<L: Link> SerialEndpoint<L> {
    /// Creates a serial endpoint owning `link`.
    pub fn new(link: L, config: SerialConfig, endpoint_id: u32) -> Result<Self> {
        Self::with_clock(link, config, endpoint_id, Arc::new(MonotonicClock))
    }

    /// Creates a serial endpoint with an injected clock.
    pub fn with_clock(
        link: L,
        config: SerialConfig,
        endpoint_id: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        trace!(
            endpoint_id,
            baud = config.baud,
            data_bits = config.data_bits,
            stop_bits = config.stop_bits,
            "serial endpoint created"
        );
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
    pub fn config(&self) -> &SerialConfig {
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

    /// Bytes waiting in the receive buffer.
    pub fn rx_buffered(&self) -> usize {
        self.rx_buffer.len()
    }

    /// Discards all buffered receive bytes.
    pub fn clear_rx_buffer(&mut self) {
        self.rx_buffer.clear();
    }

    fn drain_link(&mut self) -> Result<()> {
        loop {
            match self.link.recv() {
                Ok(frame) => {
                    if !frame.is_kind(FrameType::Serial) {
                        warn!(
                            frame_type = frame.frame_type,
                            "ignoring non-serial frame on serial endpoint"
                        );
                        continue;
                    }
                    self.rx_buffer.extend(frame.payload.iter());
                }
                Err(e) if e.is_timeout() => {
                    if self.rx_buffer.is_empty() {
                        return Err(ErrorKind::Timeout("no serial data available"));
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<L: Link> Endpoint for SerialEndpoint<L> {
    /// Sends a byte stream: one frame per byte, delivery times spaced by the
    /// character time so the bytes serialize at the configured baud rate.
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let byte_time = self.config.byte_time_ns();
        let now = self.clock.now_ns();
        trace!(len = data.len(), byte_time, "serial send");

        for &byte in data {
            self.last_tx_deliver_at_ns = now.max(self.last_tx_deliver_at_ns) + byte_time;
            let frame = Frame::with_timestamps(
                FrameType::Serial,
                vec![byte],
                now,
                self.last_tx_deliver_at_ns,
            )
            .from_endpoint(self.endpoint_id);
            self.link.send(&frame)?;
        }
        Ok(())
    }

    /// Returns up to `max_chunk_read` buffered bytes, draining the link
    /// first. An empty buffer is a `Timeout`.
    fn recv(&mut self) -> Result<Vec<u8>> {
        if let Err(e) = self.process() {
            trace!(error = %e, "serial process found nothing");
        }

        if self.rx_buffer.is_empty() {
            return Err(ErrorKind::Timeout("no serial data available"));
        }
        let take = self.rx_buffer.len().min(self.config.max_chunk_read);
        Ok(self.rx_buffer.drain(..take).collect())
    }

    /// Appends every arriving SERIAL frame's payload to the receive buffer
    /// in arrival order. Frames of other types are skipped with a warning.
    fn process(&mut self) -> Result<()> {
        self.drain_link()
    }

    fn name(&self) -> String {
        format!("serial_{}", self.endpoint_id)
    }

    fn endpoint_id(&self) -> u32 {
        self.endpoint_id
    }
}
