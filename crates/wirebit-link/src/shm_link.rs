//! Duplex link over paired shared-memory frame rings.
//!
//! Each link name owns two POSIX shared-memory rings, `/<name>_tx` and
//! `/<name>_rx`. The creator (server) writes into `_tx` and reads `_rx`;
//! an attacher (client) swaps the names so each side writes into the ring
//! the other reads. The server's rings outlive every client: dropping the
//! server unlinks both names.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use wirebit_core::{
    Clock, DeterministicRng, ErrorKind, MonotonicClock, Result, TimeNs,
};
use wirebit_frame::Frame;
use wirebit_ring::FrameRing;

use crate::{
    link::Link,
    model::{
        compute_deliver_at_ns, corrupt_payload, determine_frame_action, FrameAction, LinkModel,
    },
    stats::LinkStats,
};

/// Mutable simulation state for one direction of the wire.
#[derive(Debug)]
struct ModelState {
    model: LinkModel,
    rng: DeterministicRng,
    next_send_time_ns: TimeNs,
}

impl ModelState {
    fn new(model: LinkModel) -> Self {
        let rng = DeterministicRng::new(model.seed);
        Self { model, rng, next_send_time_ns: 0 }
    }
}

/// Bidirectional shared-memory link with optional impairment simulation.
///
/// Delivery timestamps are enforced on receive: a popped frame whose
/// `deliver_at_ns` lies in the future is parked in a one-slot pending buffer
/// and the call reports `Timeout` until the frame falls due. No frame is
/// ever surfaced early.
pub struct ShmLink {
    name: String,
    tx_ring: FrameRing,
    rx_ring: FrameRing,
    sim: Option<ModelState>,
    pending: Option<Frame>,
    stats: LinkStats,
    clock: Arc<dyn Clock>,
}

impl ShmLink {
    fn ring_names(name: &str) -> (String, String) {
        (format!("/{}_tx", name), format!("/{}_rx", name))
    }

    /// Creates the server side of a link, allocating both rings.
    pub fn create(name: &str, capacity_bytes: usize, model: Option<LinkModel>) -> Result<Self> {
        Self::create_with_clock(name, capacity_bytes, model, Arc::new(MonotonicClock))
    }

    /// Creates the server side with an injected clock.
    pub fn create_with_clock(
        name: &str,
        capacity_bytes: usize,
        model: Option<LinkModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (tx_name, rx_name) = Self::ring_names(name);
        let tx_ring = FrameRing::create_shm(&tx_name, capacity_bytes)?;
        let rx_ring = FrameRing::create_shm(&rx_name, capacity_bytes)?;
        info!(name, capacity_bytes, "created shared-memory link");
        Ok(Self::assemble(name, tx_ring, rx_ring, model, clock))
    }

    /// Attaches the client side of an existing link. The ring names are
    /// swapped so this side transmits into the ring the server receives.
    pub fn attach(name: &str, model: Option<LinkModel>) -> Result<Self> {
        Self::attach_with_clock(name, model, Arc::new(MonotonicClock))
    }

    /// Attaches the client side with an injected clock.
    pub fn attach_with_clock(
        name: &str,
        model: Option<LinkModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (tx_name, rx_name) = Self::ring_names(name);
        let tx_ring = FrameRing::attach_shm(&rx_name)?;
        let rx_ring = FrameRing::attach_shm(&tx_name)?;
        info!(name, "attached shared-memory link");
        Ok(Self::assemble(name, tx_ring, rx_ring, model, clock))
    }

    fn assemble(
        name: &str,
        tx_ring: FrameRing,
        rx_ring: FrameRing,
        model: Option<LinkModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            tx_ring,
            rx_ring,
            sim: model.map(ModelState::new),
            pending: None,
            stats: LinkStats::default(),
            clock,
        }
    }

    /// Installs an impairment model, reseeding its RNG and resetting the
    /// wire pacing state.
    pub fn set_model(&mut self, model: LinkModel) {
        debug!(name = %self.name, "link model enabled");
        self.sim = Some(ModelState::new(model));
    }

    /// Removes the impairment model.
    pub fn clear_model(&mut self) {
        debug!(name = %self.name, "link model disabled");
        self.sim = None;
    }

    /// True when an impairment model is installed.
    pub fn has_model(&self) -> bool {
        self.sim.is_some()
    }

    /// Current transfer counters.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Resets the transfer counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Transmit-ring fill level in [0, 1].
    pub fn tx_usage(&self) -> f32 {
        self.tx_ring.usage()
    }

    /// Receive-ring fill level in [0, 1].
    pub fn rx_usage(&self) -> f32 {
        self.rx_ring.usage()
    }

    /// Transmit-ring capacity in bytes.
    pub fn tx_capacity(&self) -> usize {
        self.tx_ring.capacity()
    }

    /// Receive-ring capacity in bytes.
    pub fn rx_capacity(&self) -> usize {
        self.rx_ring.capacity()
    }

    fn push_tx(stats: &mut LinkStats, tx_ring: &mut FrameRing, frame: &Frame) -> Result<()> {
        match tx_ring.push_frame(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                stats.send_errors += 1;
                Err(e)
            }
        }
    }
}

impl Link for ShmLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        trace!(
            name = %self.name,
            src = frame.src_endpoint_id,
            dst = frame.dst_endpoint_id,
            "link send"
        );

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += frame.total_size() as u64;

        let sim = match self.sim.as_mut() {
            // No simulation: direct send.
            None => return Self::push_tx(&mut self.stats, &mut self.tx_ring, frame),
            Some(sim) => sim,
        };

        let mut simulated = frame.clone();
        match determine_frame_action(&sim.model, &mut sim.rng) {
            FrameAction::Drop => {
                self.stats.frames_dropped += 1;
                warn!(name = %self.name, "frame dropped by link model");
                // The medium ate it; the send succeeded.
                return Ok(());
            }
            FrameAction::Duplicate => {
                self.stats.frames_duplicated += 1;
                warn!(name = %self.name, "frame duplicated by link model");
                // The first copy keeps the header exactly as the endpoint
                // set it; the second gets the computed delivery time below.
                Self::push_tx(&mut self.stats, &mut self.tx_ring, &simulated)?;
            }
            FrameAction::Corrupt => {
                self.stats.frames_corrupted += 1;
                warn!(name = %self.name, "frame corrupted by link model");
                corrupt_payload(&mut simulated.payload, &mut sim.rng);
            }
            FrameAction::Deliver => {}
        }

        let now = self.clock.now_ns();
        simulated.deliver_at_ns = compute_deliver_at_ns(
            &sim.model,
            now,
            simulated.payload.len(),
            &mut sim.next_send_time_ns,
            &mut sim.rng,
        );

        Self::push_tx(&mut self.stats, &mut self.tx_ring, &simulated)
    }

    fn recv(&mut self) -> Result<Frame> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => {
                let frame = match self.rx_ring.pop_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        if !e.is_timeout() {
                            self.stats.recv_errors += 1;
                        }
                        return Err(e);
                    }
                };
                self.stats.frames_received += 1;
                self.stats.bytes_received += frame.total_size() as u64;
                frame
            }
        };

        if frame.deliver_at_ns > 0 && self.clock.now_ns() < frame.deliver_at_ns {
            trace!(
                name = %self.name,
                deliver_at = frame.deliver_at_ns,
                "frame not yet due, holding"
            );
            self.pending = Some(frame);
            return Err(ErrorKind::Timeout("frame not yet due"));
        }

        trace!(
            name = %self.name,
            src = frame.src_endpoint_id,
            dst = frame.dst_endpoint_id,
            "link recv"
        );
        Ok(frame)
    }

    fn can_send(&self) -> bool {
        !self.tx_ring.is_full()
    }

    fn can_recv(&self) -> bool {
        self.pending.is_some() || !self.rx_ring.is_empty()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ShmLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmLink")
            .field("name", &self.name)
            .field("has_model", &self.sim.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
