//! Error types for the image-composition core.

use thiserror::Error;

/// Result type for composition operations.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Errors that can occur while compressing, compositing, or exchanging
/// sparse images.
///
/// All four kinds are fatal to the in-flight compose: there is no local
/// recovery, since scratch buffers alias between rounds once a compose is
/// underway.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A violated internal invariant: mismatched partition counts, a
    /// received image with the wrong pixel count, a factorization whose
    /// product doesn't match the world size, and the like.
    #[error("sanity check failed: {0}")]
    SanityCheck(String),

    /// The caller's rank is not a member of the compose-group it was asked
    /// to participate in.
    #[error("topology error: rank {rank} not in compose-group of size {group_size}")]
    Topology {
        /// The rank that was looked up.
        rank: usize,
        /// The size of the compose-group it was expected to belong to.
        group_size: usize,
    },

    /// A received sparse image's declared format disagrees with what the
    /// receiver expected (pixel count, color format, or depth format).
    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        /// Human-readable description of the expected format/shape.
        expected: String,
        /// Human-readable description of what was actually received.
        actual: String,
    },

    /// An opaque failure surfaced by the message-passing transport.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ComposeError {
    /// Shorthand for constructing a [`ComposeError::SanityCheck`] from any
    /// displayable detail.
    pub fn sanity(detail: impl std::fmt::Display) -> Self {
        Self::SanityCheck(detail.to_string())
    }
}
