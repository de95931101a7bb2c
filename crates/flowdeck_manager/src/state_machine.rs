use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowdeck_common::{GridCoordinate, Position, PositionState};

use crate::store::{PositionRecord, PositionStore};

/// A discrete report from the hardware/software event source.
///
/// These are the only triggers for position state transitions besides the
/// reset orchestrator. They can be written as Bevy messages from inside the
/// app or injected through [`crate::ManagerHandle::report`].
#[derive(Debug, Clone, Message, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Hardware was enumerated at startup or hot-plugged.
    HardwareDetected {
        name: String,
        location: Option<GridCoordinate>,
        removable: bool,
    },
    /// Per-position software is up and bound to the listed ports.
    SoftwareReady { name: String, rpc_endpoints: Vec<u16> },
    /// Per-position software failed to launch.
    SoftwareFailed { name: String, error_info: String },
    /// Per-position software exited while it was supposed to be running.
    SoftwareExited { name: String, error_info: String },
    /// Communication with the hardware was lost; it may still be attached.
    HardwareLost { name: String, error_info: String },
    /// Removable hardware was physically disconnected.
    HardwareUnplugged { name: String },
}

impl DeviceEvent {
    pub fn position_name(&self) -> &str {
        match self {
            DeviceEvent::HardwareDetected { name, .. }
            | DeviceEvent::SoftwareReady { name, .. }
            | DeviceEvent::SoftwareFailed { name, .. }
            | DeviceEvent::SoftwareExited { name, .. }
            | DeviceEvent::HardwareLost { name, .. }
            | DeviceEvent::HardwareUnplugged { name } => name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::HardwareDetected { .. } => "hardware-detected",
            DeviceEvent::SoftwareReady { .. } => "software-ready",
            DeviceEvent::SoftwareFailed { .. } => "software-failed",
            DeviceEvent::SoftwareExited { .. } => "software-exited",
            DeviceEvent::HardwareLost { .. } => "hardware-lost",
            DeviceEvent::HardwareUnplugged { .. } => "hardware-unplugged",
        }
    }
}

/// An event the transition table does not permit.
///
/// These are internal-consistency failures originating from the event
/// source, not from a client request; they are logged and the position is
/// left in its last valid state, because guessing a transition could
/// misreport hardware status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{event} is not a legal event for position {name} in state {from}")]
    InvalidTransition {
        name: String,
        from: &'static str,
        event: &'static str,
    },
    #[error("received {event} for unknown position {name}")]
    UnknownPosition { name: String, event: &'static str },
    #[error("software for position {name} reported ready without any rpc endpoints")]
    MissingEndpoints { name: String },
    #[error("position {name} is integrated and cannot be unplugged")]
    NotRemovable { name: String },
}

/// What applying a device event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// A new position entered the store in INITIALISING; its software
    /// should now be launched.
    Registered,
    /// An existing position transitioned (or refreshed its endpoints).
    Updated,
    /// Presence bookkeeping only; nothing observable changed.
    Noted,
}

/// Feed one event through the transition table.
///
/// A transition either fully applies (state, endpoints and error_info move
/// together in a single record write) or the store is left untouched.
pub(crate) fn apply_device_event(
    store: &mut PositionStore,
    event: &DeviceEvent,
) -> Result<Applied, TransitionError> {
    let kind = event.kind();
    match event {
        DeviceEvent::HardwareDetected {
            name,
            location,
            removable,
        } => match store.get(name) {
            None => {
                store.upsert(PositionRecord::new(Position {
                    name: name.clone(),
                    location: *location,
                    state: PositionState::Initialising,
                    removable: *removable,
                }));
                Ok(Applied::Registered)
            }
            Some(existing) => {
                // Repeated enumeration or re-plug of a tracked unit: re-arm
                // presence, backfill a missing location, never rewind state.
                let mut record = existing.clone();
                record.hardware_present = true;
                if record.position.location.is_none() {
                    record.position.location = *location;
                }
                store.upsert(record);
                Ok(Applied::Noted)
            }
        },

        DeviceEvent::SoftwareReady {
            name,
            rpc_endpoints,
        } => {
            if rpc_endpoints.is_empty() {
                return Err(TransitionError::MissingEndpoints { name: name.clone() });
            }
            transition(store, name, kind, |state| match state {
                // INITIALISING -> RUNNING, or an endpoint refresh while RUNNING.
                PositionState::Initialising | PositionState::Running { .. } => {
                    Some(PositionState::Running {
                        rpc_endpoints: rpc_endpoints.clone(),
                    })
                }
                _ => None,
            })
        }

        DeviceEvent::SoftwareFailed { name, error_info } => {
            transition(store, name, kind, |state| match state {
                PositionState::Initialising => Some(PositionState::SoftwareError {
                    error_info: error_info.clone(),
                }),
                _ => None,
            })
        }

        DeviceEvent::SoftwareExited { name, error_info } => {
            transition(store, name, kind, |state| match state {
                PositionState::Running { .. } => Some(PositionState::SoftwareError {
                    error_info: error_info.clone(),
                }),
                _ => None,
            })
        }

        DeviceEvent::HardwareLost { name, error_info } => {
            transition(store, name, kind, |state| match state {
                // Software has not been told to stop, so endpoints linger.
                PositionState::Running { rpc_endpoints } => Some(PositionState::HardwareError {
                    error_info: error_info.clone(),
                    rpc_endpoints: rpc_endpoints.clone(),
                }),
                PositionState::Initialising => Some(PositionState::HardwareError {
                    error_info: error_info.clone(),
                    rpc_endpoints: Vec::new(),
                }),
                _ => None,
            })
        }

        DeviceEvent::HardwareUnplugged { name } => {
            let Some(existing) = store.get(name) else {
                return Err(TransitionError::UnknownPosition {
                    name: name.clone(),
                    event: kind,
                });
            };
            if !existing.position.removable {
                return Err(TransitionError::NotRemovable { name: name.clone() });
            }
            // Presence is bookkeeping, not a transition: record it even when
            // the state machine rejects the event (e.g. an unplug while
            // RESETTING), so the in-flight reset still picks the right
            // terminal branch.
            let mut record = existing.clone();
            record.hardware_present = false;
            let from = record.position.state.name();
            match record.position.state {
                PositionState::Running { .. }
                | PositionState::HardwareError { .. }
                | PositionState::SoftwareError { .. } => {
                    record.position.state = PositionState::HardwareRemoved;
                    store.upsert(record);
                    Ok(Applied::Updated)
                }
                _ => {
                    store.upsert(record);
                    Err(TransitionError::InvalidTransition {
                        name: name.clone(),
                        from,
                        event: kind,
                    })
                }
            }
        }
    }
}

fn transition(
    store: &mut PositionStore,
    name: &str,
    event: &'static str,
    next: impl FnOnce(&PositionState) -> Option<PositionState>,
) -> Result<Applied, TransitionError> {
    let Some(existing) = store.get(name) else {
        return Err(TransitionError::UnknownPosition {
            name: name.to_string(),
            event,
        });
    };
    match next(&existing.position.state) {
        Some(state) => {
            let mut record = existing.clone();
            record.position.state = state;
            store.upsert(record);
            Ok(Applied::Updated)
        }
        None => Err(TransitionError::InvalidTransition {
            name: name.to_string(),
            from: existing.position.state.name(),
            event,
        }),
    }
}
