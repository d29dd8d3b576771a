//! Error types.

use crate::{buffers::Device, key::CoordinateMapKey};

/// Errors produced by coordinate and kernel map operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Referenced coordinate map is not registered in the manager.
    #[error("coordinate map not found: {0}")]
    NotFound(CoordinateMapKey),

    /// Coordinate dimensionality or kernel geometry lengths are inconsistent.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Coordinates in a single batch have different lengths.
    #[error("invalid coordinate shape: expected {expected} components, got {actual}")]
    InvalidShape {
        /// Coordinate size established by the first row.
        expected: usize,
        /// Length of the offending row.
        actual: usize,
    },

    /// Buffer lives on a device other than the one of the backend.
    #[error("device mismatch: backend is on {expected}, buffer is on {actual}")]
    DeviceMismatch {
        /// Device of the backend.
        expected: Device,
        /// Device of the buffer.
        actual: Device,
    },

    /// Operation is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Internal consistency requirement is violated by the arguments.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result of coordinate and kernel map operations.
pub type Result<T> = std::result::Result<T, Error>;
