//! Error taxonomy for the stream engine.
//!
//! The engine distinguishes "no more data" (a normal condition every read
//! loop must handle) from hard failures. Backend failures pass through
//! unchanged; the core adds its own variants only at the point a failure
//! is detected (allocation, marker validation, orientation binding).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Failure modes of the buffered-stream core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// No further input is available. Not fatal; read loops stop here.
    #[error("end of data")]
    EndOfData,

    /// A buffer of the given size could not be allocated. The stream is
    /// left in its last fully-consistent state.
    #[error("failed to allocate a {0}-byte buffer")]
    Allocation(usize),

    /// The backend reported a hard failure from underflow/overflow/sync.
    #[error("backend operation failed")]
    Backend,

    /// The stream is already bound to the other orientation.
    #[error("stream orientation mismatch")]
    Orientation,

    /// A marker handle from a different stream was presented.
    #[error("marker belongs to a different stream")]
    ForeignMarker,

    /// A marker handle that was removed, or whose stream was finalized.
    #[error("marker is no longer valid")]
    StaleMarker,

    /// The backend does not implement the requested operation
    /// (seeking, stat) and no default behavior exists.
    #[error("operation not supported by this stream")]
    Unsupported,

    /// A write was attempted on a stream flagged as read-only.
    #[error("stream is not open for writing")]
    ReadOnly,
}

impl StreamError {
    /// True for the non-fatal end-of-input condition.
    #[must_use]
    pub fn is_end_of_data(self) -> bool {
        self == StreamError::EndOfData
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_data_is_not_a_hard_failure() {
        assert!(StreamError::EndOfData.is_end_of_data());
        assert!(!StreamError::Backend.is_end_of_data());
    }

    #[test]
    fn display_names_are_stable() {
        assert_eq!(StreamError::EndOfData.to_string(), "end of data");
        assert_eq!(
            StreamError::Allocation(128).to_string(),
            "failed to allocate a 128-byte buffer"
        );
    }
}
