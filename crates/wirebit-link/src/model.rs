//! Link impairment model.
//!
//! The model turns a perfect queue into a simulated physical medium. Every
//! decision is driven by a [`DeterministicRng`] seeded from the model, so a
//! fixed `(seed, frame sequence, payload sizes)` reproduces the exact same
//! actions and delivery times on every platform.

use tracing::{debug, trace};
use wirebit_core::{DeterministicRng, TimeNs};

/// Immutable impairment parameters for one link direction.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkModel {
    /// Fixed latency added to every delivered frame, in nanoseconds.
    pub base_latency_ns: TimeNs,
    /// Additional uniform latency in `[0, jitter_ns)` nanoseconds.
    pub jitter_ns: TimeNs,
    /// Probability a frame is silently dropped, in [0, 1].
    pub drop_prob: f64,
    /// Probability a frame is duplicated, in [0, 1].
    pub dup_prob: f64,
    /// Probability a frame's payload is corrupted, in [0, 1].
    pub corrupt_prob: f64,
    /// Wire bandwidth in bits per second; 0 means unlimited.
    pub bandwidth_bps: u64,
    /// Seed for the per-link RNG.
    pub seed: u64,
}

impl Default for LinkModel {
    fn default() -> Self {
        Self {
            base_latency_ns: 0,
            jitter_ns: 0,
            drop_prob: 0.0,
            dup_prob: 0.0,
            corrupt_prob: 0.0,
            bandwidth_bps: 0,
            seed: 0,
        }
    }
}

impl LinkModel {
    /// A model that only adds fixed latency.
    pub fn with_latency(base_latency_ns: TimeNs) -> Self {
        Self { base_latency_ns, ..Default::default() }
    }

    /// True when the model has no random component: no jitter and all three
    /// probabilities zero.
    pub fn is_deterministic(&self) -> bool {
        self.jitter_ns == 0
            && self.drop_prob == 0.0
            && self.dup_prob == 0.0
            && self.corrupt_prob == 0.0
    }

    /// True when frames serialize over a finite wire.
    pub fn has_bandwidth_limit(&self) -> bool {
        self.bandwidth_bps > 0
    }
}

/// Outcome of the per-frame impairment decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// Deliver the frame unchanged.
    Deliver,
    /// Discard the frame; the send still succeeds.
    Drop,
    /// Enqueue the frame twice.
    Duplicate,
    /// Flip payload bits before delivering.
    Corrupt,
}

/// Draws the impairment decision for one frame.
///
/// Three independent draws are taken in drop, duplicate, corrupt order;
/// an earlier hit short-circuits the rest. Zero-probability stages consume
/// no draw, keeping the RNG stream identical across configurations that
/// disable a stage.
pub fn determine_frame_action(model: &LinkModel, rng: &mut DeterministicRng) -> FrameAction {
    if model.drop_prob > 0.0 && rng.uniform() < model.drop_prob {
        return FrameAction::Drop;
    }
    if model.dup_prob > 0.0 && rng.uniform() < model.dup_prob {
        return FrameAction::Duplicate;
    }
    if model.corrupt_prob > 0.0 && rng.uniform() < model.corrupt_prob {
        return FrameAction::Corrupt;
    }
    FrameAction::Deliver
}

/// Computes the delivery time for a frame and advances the wire.
///
/// `next_send_time_ns` is the per-direction pacing state: a frame cannot
/// start transmitting before the previous one finished, so delivery times
/// are non-decreasing in send order.
pub fn compute_deliver_at_ns(
    model: &LinkModel,
    now_ns: TimeNs,
    payload_len: usize,
    next_send_time_ns: &mut TimeNs,
    rng: &mut DeterministicRng,
) -> TimeNs {
    let mut latency = model.base_latency_ns;
    if model.jitter_ns > 0 {
        latency += rng.range(model.jitter_ns as u64) as TimeNs;
    }

    let transmit_time_ns = if model.bandwidth_bps > 0 {
        (payload_len as u64 * 8).saturating_mul(1_000_000_000) as i64 / model.bandwidth_bps as i64
    } else {
        0
    };

    let send_time = now_ns.max(*next_send_time_ns);
    *next_send_time_ns = send_time + transmit_time_ns;

    let deliver_at = send_time + latency;
    trace!(deliver_at, send_time, latency, transmit_time_ns, "scheduled delivery");
    deliver_at
}

/// Flips 1–3 random payload bits in place. Empty payloads are untouched;
/// headers are never corrupted, so simulated corruption cannot break
/// decoding.
pub fn corrupt_payload(payload: &mut [u8], rng: &mut DeterministicRng) {
    if payload.is_empty() {
        return;
    }
    let flips = 1 + rng.range(3);
    for _ in 0..flips {
        let byte_idx = rng.range(payload.len() as u64) as usize;
        let bit_idx = rng.range(8) as u32;
        payload[byte_idx] ^= 1 << bit_idx;
    }
    debug!(flips, "corrupted payload");
}
