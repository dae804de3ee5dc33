#![warn(missing_docs)]

//! wirebit-link: the transport between two endpoints.
//!
//! A link is a pair of uni-directional frame queues with an optional
//! impairment model. [`ShmLink`] is the shared-memory implementation: two
//! named SPSC frame rings give two cooperating processes a lock-free duplex
//! channel, and an attached [`LinkModel`] reproduces latency, jitter,
//! bandwidth pacing, drops, duplicates, and corruption at send time.

/// The bidirectional link contract.
pub mod link;
/// Impairment model and delivery-time computation.
pub mod model;
/// Duplex link over paired shared-memory rings.
pub mod shm_link;
/// Per-link transfer counters.
pub mod stats;

pub use link::Link;
pub use model::{FrameAction, LinkModel};
pub use shm_link::ShmLink;
pub use stats::LinkStats;
