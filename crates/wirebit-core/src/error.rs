//! Error handling for all wirebit layers.
//!
//! Every fallible operation in the workspace returns [`Result`]. The variants
//! map one-to-one onto the caller policies of the wire layer: transient
//! conditions (ring empty/full, frame not yet due) are [`ErrorKind::Timeout`]
//! and are safe to retry after an external wait; everything else is a real
//! fault that the caller should report rather than retry.

use std::io;

use thiserror::Error;

/// Convenience alias used by all wirebit crates.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// The error type for wirebit operations.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A caller-supplied value was rejected: bad DLC, undersized frame,
    /// wrong frame type, corrupt record length.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer speaks an incompatible wire format (magic or version
    /// mismatch on decode).
    #[error("incompatible frame format: {0}")]
    Format(String),

    /// A transient non-ready condition: ring empty or full, or a frame whose
    /// delivery time has not arrived. Retry after waiting externally.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// An unexpected failure from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A named shared-memory object or OS device does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ErrorKind {
    /// Returns true for the transient, retry-after-wait conditions.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::Timeout(_))
    }
}
