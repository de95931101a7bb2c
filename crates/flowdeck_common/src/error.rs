use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The manager service has shut down; no further requests can be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("the position manager has shut down")]
pub struct ManagerClosed;

/// Typed failure of a reset request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ResetError {
    /// No position with this name is known to the store.
    #[error("position {position_name} is not known")]
    NotFound { position_name: String },

    /// The position is RUNNING and the caller did not pass `force`.
    #[error("position {position_name} is running; pass force to reset it anyway")]
    Running { position_name: String },

    /// The per-position software did not stop within the configured bound.
    /// The position has been parked in SOFTWARE_ERROR rather than left
    /// wedged in RESETTING.
    #[error("software for {position_name} did not stop within {waited_ms}ms")]
    Timeout {
        position_name: String,
        waited_ms: u64,
    },

    /// The manager shut down while the reset was pending.
    #[error(transparent)]
    Closed(#[from] ManagerClosed),
}

/// Why a watch stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WatchClosed {
    /// The subscriber's backlog stayed over the configured bound and the
    /// stream was disconnected so it could not stall anyone else.
    #[error("watch subscriber fell too far behind and was disconnected")]
    Overrun,
    /// The manager shut down cleanly.
    #[error("the position manager has shut down")]
    Shutdown,
}

/// Framing or serialization failure in the binary codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("packet could not be serialized")]
    Serialization,
    #[error("frame is shorter than its length prefix")]
    Truncated,
}
