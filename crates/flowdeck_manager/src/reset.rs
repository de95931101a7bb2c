use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError};
use async_trait::async_trait;
use bevy::prelude::*;
use thiserror::Error;

use flowdeck_common::{PositionState, ResetError, ResetOutcome};

use crate::facade::ManagerHandle;
use crate::runtime::{ManagerRuntime, Runtime};
use crate::state_machine::DeviceEvent;
use crate::store::PositionStore;

/// Failure reported by the software launcher collaborator.
#[derive(Debug, Clone, Error)]
pub enum LauncherError {
    #[error("no software is managed for position {0}")]
    UnknownPosition(String),
    #[error("launcher failed for position {0}: {1}")]
    Failed(String, String),
}

/// Starts and stops the per-position analysis software.
///
/// Implementations wrap whatever actually supervises the software
/// (a process supervisor, a container runtime, a simulator). `start` is
/// fire-and-forget from the engine's point of view: readiness arrives later
/// as a [`DeviceEvent::SoftwareReady`] from the event source, a launch
/// failure as [`DeviceEvent::SoftwareFailed`].
#[async_trait]
pub trait SoftwareLauncher: Send + Sync + 'static {
    async fn start(&self, position_name: &str) -> Result<(), LauncherError>;
    async fn stop(&self, position_name: &str) -> Result<(), LauncherError>;
}

/// Resource wrapping the active launcher implementation.
#[derive(Resource, Clone)]
pub struct LauncherResource(pub Arc<dyn SoftwareLauncher>);

/// Tuning for the reset sequence.
#[derive(Resource, Clone)]
pub struct ResetSettings {
    /// How long a software stop may take before the reset is abandoned and
    /// the position parked in SOFTWARE_ERROR.
    pub stop_timeout: Duration,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) type ResetReply = Sender<Result<ResetOutcome, ResetError>>;

/// One reset sequence in flight.
struct ActiveReset {
    position_name: String,
    /// `Time::elapsed` when the stop was issued.
    started: Duration,
    outcome_rx: Receiver<Result<(), LauncherError>>,
    /// Every caller waiting on this reset; duplicates join rather than
    /// issuing a second stop.
    replies: Vec<ResetReply>,
}

/// All resets currently in flight.
#[derive(Resource, Default)]
pub(crate) struct ResetTracker {
    active: Vec<ActiveReset>,
}

impl ResetTracker {
    /// Fail every pending reset (clean shutdown).
    pub(crate) fn fail_all(&mut self, err: ResetError) {
        for reset in self.active.drain(..) {
            for reply in reset.replies {
                let _ = reply.try_send(Err(err.clone()));
            }
        }
    }
}

/// Start a reset sequence for one position.
///
/// The facade has already validated the request (existence, force policy);
/// an explicit reset is honored here regardless of what `force` said.
pub(crate) fn begin_reset<RT: Runtime>(
    store: &mut PositionStore,
    tracker: &mut ResetTracker,
    launcher: &LauncherResource,
    runtime: &ManagerRuntime<RT>,
    now: Duration,
    position_name: String,
    reply: ResetReply,
) {
    let Some(existing) = store.get(&position_name) else {
        let _ = reply.try_send(Err(ResetError::NotFound { position_name }));
        return;
    };

    // A second caller joins the in-flight sequence instead of stopping the
    // software twice.
    if let Some(active) = tracker
        .active
        .iter_mut()
        .find(|reset| reset.position_name == position_name)
    {
        active.replies.push(reply);
        return;
    }

    info!(
        "[flowdeck] Resetting position {position_name} (was {})",
        existing.position.state
    );

    // Any state may enter RESETTING.
    let mut record = existing.clone();
    record.position.state = PositionState::Resetting;
    store.upsert(record);

    let (outcome_tx, outcome_rx) = async_channel::bounded(1);
    let launcher = launcher.0.clone();
    let stop_target = position_name.clone();
    runtime.0.spawn(async move {
        let result = launcher.stop(&stop_target).await;
        let _ = outcome_tx.send(result).await;
    });

    tracker.active.push(ActiveReset {
        position_name,
        started: now,
        outcome_rx,
        replies: vec![reply],
    });
}

/// Poll in-flight resets for stop completion or timeout and drive the
/// terminal transition.
///
/// A reset is not cancellable once started, but it can never wedge: within
/// `stop_timeout` the position reaches INITIALISING, is deleted, or is
/// parked in SOFTWARE_ERROR.
pub(crate) fn complete_resets<RT: Runtime>(
    mut store: ResMut<PositionStore>,
    mut tracker: ResMut<ResetTracker>,
    settings: Res<ResetSettings>,
    launcher: Res<LauncherResource>,
    runtime: Res<ManagerRuntime<RT>>,
    handle: Res<ManagerHandle>,
    time: Res<Time>,
) {
    if tracker.active.is_empty() {
        return;
    }

    let now = time.elapsed();
    let mut index = 0;
    while index < tracker.active.len() {
        let reset = &tracker.active[index];
        let outcome = match reset.outcome_rx.try_recv() {
            Ok(result) => Some(Some(result)),
            Err(TryRecvError::Closed) => Some(Some(Err(LauncherError::Failed(
                reset.position_name.clone(),
                "stop task dropped its result".to_string(),
            )))),
            Err(TryRecvError::Empty) => {
                if now.saturating_sub(reset.started) >= settings.stop_timeout {
                    Some(None)
                } else {
                    None
                }
            }
        };

        let Some(outcome) = outcome else {
            index += 1;
            continue;
        };

        let reset = tracker.active.swap_remove(index);
        match outcome {
            Some(stop_result) => {
                if let Err(err) = stop_result {
                    // Force-completion is safer than leaving the hardware in
                    // an undefined state; re-evaluate presence regardless.
                    warn!(
                        "[flowdeck] Stop for {} reported an error ({err}); completing reset anyway",
                        reset.position_name
                    );
                }
                finish_reset(&mut store, &launcher, &runtime, &handle, reset);
            }
            None => {
                let waited = settings.stop_timeout;
                warn!(
                    "[flowdeck] Reset of {} timed out after {}ms; parking in SOFTWARE_ERROR",
                    reset.position_name,
                    waited.as_millis()
                );
                if let Some(existing) = store.get(&reset.position_name) {
                    let mut record = existing.clone();
                    record.position.state = PositionState::SoftwareError {
                        error_info: format!(
                            "software did not stop within {}ms during reset",
                            waited.as_millis()
                        ),
                    };
                    store.upsert(record);
                }
                let err = ResetError::Timeout {
                    position_name: reset.position_name.clone(),
                    waited_ms: waited.as_millis() as u64,
                };
                for reply in reset.replies {
                    let _ = reply.try_send(Err(err.clone()));
                }
            }
        }
    }
}

/// Terminal transition after the software stopped: re-initialise if the
/// hardware is still there, delete a removable position whose hardware is
/// gone. Integrated positions are never deleted.
fn finish_reset<RT: Runtime>(
    store: &mut PositionStore,
    launcher: &LauncherResource,
    runtime: &ManagerRuntime<RT>,
    handle: &ManagerHandle,
    reset: ActiveReset,
) {
    let Some(existing) = store.get(&reset.position_name) else {
        for reply in reset.replies {
            let _ = reply.try_send(Ok(ResetOutcome::Removed));
        }
        return;
    };

    if existing.hardware_present || !existing.position.removable {
        let mut record = existing.clone();
        record.position.state = PositionState::Initialising;
        store.upsert(record);
        spawn_start(reset.position_name.clone(), launcher, runtime, handle);
        info!(
            "[flowdeck] Reset of {} complete; initialising again",
            reset.position_name
        );
        for reply in reset.replies {
            let _ = reply.try_send(Ok(ResetOutcome::Restarted));
        }
    } else {
        store.remove(&reset.position_name);
        info!(
            "[flowdeck] Reset of {} complete; hardware absent, position removed",
            reset.position_name
        );
        for reply in reset.replies {
            let _ = reply.try_send(Ok(ResetOutcome::Removed));
        }
    }
}

/// Launch the per-position software in the background. A launch failure is
/// routed back through the normal event path as SoftwareFailed.
pub(crate) fn spawn_start<RT: Runtime>(
    position_name: String,
    launcher: &LauncherResource,
    runtime: &ManagerRuntime<RT>,
    handle: &ManagerHandle,
) {
    let launcher = launcher.0.clone();
    let handle = handle.clone();
    runtime.0.spawn(async move {
        if let Err(err) = launcher.start(&position_name).await {
            let error_info = err.to_string();
            handle.report(DeviceEvent::SoftwareFailed {
                name: position_name,
                error_info,
            });
        }
    });
}
