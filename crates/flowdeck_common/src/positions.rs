use serde::{Deserialize, Serialize};

/// Physical grid coordinate of an integrated flow cell slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoordinate {
    pub x: u16,
    pub y: u16,
}

/// Lifecycle state of a flow cell position.
///
/// Each variant carries only the fields that are meaningful in that state,
/// so an illegal combination (a running position without endpoints, an
/// error state without a description) cannot be constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionState {
    /// Hardware was detected and per-position software is starting up.
    Initialising,
    /// Software is up and serving on the listed ports.
    Running {
        /// Ports the per-position software is serving on. Never empty.
        rpc_endpoints: Vec<u16>,
    },
    /// A reset sequence is in flight.
    Resetting,
    /// Removable hardware was physically disconnected while tracked.
    HardwareRemoved,
    /// Communication with the hardware was lost.
    HardwareError {
        error_info: String,
        /// Software may not have stopped yet, so endpoints can linger here.
        rpc_endpoints: Vec<u16>,
    },
    /// Per-position software failed to start or exited unexpectedly.
    SoftwareError { error_info: String },
}

impl PositionState {
    /// Upper-case state label used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PositionState::Initialising => "INITIALISING",
            PositionState::Running { .. } => "RUNNING",
            PositionState::Resetting => "RESETTING",
            PositionState::HardwareRemoved => "HARDWARE_REMOVED",
            PositionState::HardwareError { .. } => "HARDWARE_ERROR",
            PositionState::SoftwareError { .. } => "SOFTWARE_ERROR",
        }
    }

    /// Endpoints currently attached to this state, if any.
    pub fn rpc_endpoints(&self) -> &[u16] {
        match self {
            PositionState::Running { rpc_endpoints }
            | PositionState::HardwareError { rpc_endpoints, .. } => rpc_endpoints,
            _ => &[],
        }
    }

    /// Human-readable failure description, present only in error states.
    pub fn error_info(&self) -> Option<&str> {
        match self {
            PositionState::HardwareError { error_info, .. }
            | PositionState::SoftwareError { error_info } => Some(error_info),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PositionState::HardwareError { .. } | PositionState::SoftwareError { .. }
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PositionState::Running { .. })
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One flow cell position as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique, stable name of the slot (e.g. "X1", "MN12345").
    pub name: String,
    /// Grid coordinate for integrated slots; usually absent for removable
    /// units (a built-in dock slot may still report one). Immutable once set.
    pub location: Option<GridCoordinate>,
    pub state: PositionState,
    /// Whether the underlying hardware can be physically disconnected.
    /// Fixed at creation; integrated positions are never deleted.
    pub removable: bool,
}

/// Full, ordered view of every known position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub total_count: u32,
    /// All positions, ordered by name.
    pub positions: Vec<Position>,
}

/// One incremental watch message.
///
/// A position name appears in at most one of the three lists, and a
/// subscriber always sees a position in `additions` before it can ever
/// appear in `changes` or `removals`. Replaying every message from
/// subscription start reconstructs the current snapshot exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Positions this subscriber has not been told about before.
    pub additions: Vec<Position>,
    /// Positions whose state differs from what was last delivered.
    pub changes: Vec<Position>,
    /// Names of positions that no longer exist.
    pub removals: Vec<String>,
}

impl WatchEvent {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.changes.is_empty() && self.removals.is_empty()
    }
}

/// Request to reset one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    pub position_name: String,
    /// Advisory: callers set this to reset a position that is still RUNNING.
    /// The facade refuses un-forced resets of running positions; the
    /// orchestrator itself never consults this flag.
    pub force: bool,
}

/// Terminal state a successful reset left the position in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetOutcome {
    /// Hardware is still present; the position is initialising again.
    Restarted,
    /// Removable hardware was absent; the position was deleted.
    Removed,
}
