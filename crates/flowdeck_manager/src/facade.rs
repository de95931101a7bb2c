use async_channel::{Receiver, Sender};
use bevy::prelude::*;

use flowdeck_common::{
    ManagerClosed, PositionSnapshot, ResetError, ResetOutcome, ResetRequest, WatchClosed,
};

use crate::reset::{self, LauncherResource, ResetReply, ResetTracker};
use crate::runtime::{ManagerRuntime, Runtime};
use crate::state_machine::{self, Applied, DeviceEvent};
use crate::store::PositionStore;
use crate::watch::{WatchRegistry, WatchSettings, WatchStream};

/// A request from outside the schedule.
pub(crate) enum ManagerCommand {
    Report(DeviceEvent),
    Snapshot {
        reply: Sender<PositionSnapshot>,
    },
    Watch {
        reply: Sender<WatchStream>,
    },
    Reset {
        request: ResetRequest,
        reply: ResetReply,
    },
    Shutdown,
}

/// Cloneable entry point for everything living outside the manager's
/// schedule: transport adapters, the device event source, tests.
///
/// All requests funnel through one channel drained by a single system, so
/// every mutation is serialized through the same path no matter how many
/// handles exist. The handle is inserted as a resource by
/// [`crate::FlowDeckPlugin`]; clone it out of the world before handing the
/// `App` to its runner.
#[derive(Resource, Clone)]
pub struct ManagerHandle {
    commands: Sender<ManagerCommand>,
}

/// Receiving half of the command channel, private to the schedule.
#[derive(Resource)]
pub(crate) struct ManagerCommands {
    receiver: Receiver<ManagerCommand>,
}

impl ManagerHandle {
    pub(crate) fn channel() -> (Self, ManagerCommands) {
        // Inbound can stay unbounded: producers are the event source and
        // request callers, both self-limiting; subscriber mailboxes are the
        // bounded side.
        let (commands, receiver) = async_channel::unbounded();
        (Self { commands }, ManagerCommands { receiver })
    }

    /// Feed one device event into the engine. Events reported after
    /// shutdown are dropped.
    pub fn report(&self, event: DeviceEvent) {
        let _ = self.commands.try_send(ManagerCommand::Report(event));
    }

    /// Full current view of every position, bypassing the diff machinery.
    pub async fn snapshot(&self) -> Result<PositionSnapshot, ManagerClosed> {
        let (reply, response) = async_channel::bounded(1);
        self.commands
            .send(ManagerCommand::Snapshot { reply })
            .await
            .map_err(|_| ManagerClosed)?;
        response.recv().await.map_err(|_| ManagerClosed)
    }

    /// Open a watch call. The stream's first message carries the full
    /// current snapshot as additions.
    pub async fn watch(&self) -> Result<WatchStream, ManagerClosed> {
        let (reply, response) = async_channel::bounded(1);
        self.commands
            .send(ManagerCommand::Watch { reply })
            .await
            .map_err(|_| ManagerClosed)?;
        response.recv().await.map_err(|_| ManagerClosed)
    }

    /// Reset one position, suspending until the sequence reaches a terminal
    /// state or times out.
    pub async fn reset(
        &self,
        position_name: impl Into<String>,
        force: bool,
    ) -> Result<ResetOutcome, ResetError> {
        self.execute_reset(ResetRequest {
            position_name: position_name.into(),
            force,
        })
        .await
    }

    /// [`reset`](Self::reset) for callers that already hold a wire-level
    /// request (e.g. a transport adapter).
    pub async fn execute_reset(
        &self,
        request: ResetRequest,
    ) -> Result<ResetOutcome, ResetError> {
        let (reply, response) = async_channel::bounded(1);
        self.commands
            .send(ManagerCommand::Reset { request, reply })
            .await
            .map_err(|_| ManagerClosed)?;
        response.recv().await.map_err(|_| ManagerClosed)?
    }

    /// Stop the engine: watch streams end with a Shutdown close reason,
    /// pending resets fail with ManagerClosed, the app exits.
    pub fn shutdown(&self) {
        let _ = self.commands.try_send(ManagerCommand::Shutdown);
    }
}

/// Drain and dispatch every queued command.
pub(crate) fn process_commands<RT: Runtime>(
    mut store: ResMut<PositionStore>,
    mut registry: ResMut<WatchRegistry>,
    mut tracker: ResMut<ResetTracker>,
    commands: Res<ManagerCommands>,
    watch_settings: Res<WatchSettings>,
    launcher: Res<LauncherResource>,
    runtime: Res<ManagerRuntime<RT>>,
    handle: Res<ManagerHandle>,
    time: Res<Time>,
    mut exit: MessageWriter<AppExit>,
) {
    while let Ok(command) = commands.receiver.try_recv() {
        match command {
            ManagerCommand::Report(event) => {
                ingest_event(&mut store, &event, &launcher, &runtime, &handle);
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.try_send(store.snapshot());
            }
            ManagerCommand::Watch { reply } => {
                let stream = registry.subscribe(&store, watch_settings.mailbox_capacity);
                let _ = reply.try_send(stream);
            }
            ManagerCommand::Reset { request, reply } => {
                let ResetRequest {
                    position_name,
                    force,
                } = request;
                let running = match store.get(&position_name) {
                    Some(record) => record.position.state.is_running(),
                    None => {
                        let _ = reply.try_send(Err(ResetError::NotFound { position_name }));
                        continue;
                    }
                };
                // Policy decision: an un-forced reset of a healthy RUNNING
                // position is refused as unnecessary. The orchestrator
                // itself never consults `force`.
                if running && !force {
                    let _ = reply.try_send(Err(ResetError::Running { position_name }));
                    continue;
                }
                reset::begin_reset(
                    &mut store,
                    &mut tracker,
                    &launcher,
                    &runtime,
                    time.elapsed(),
                    position_name,
                    reply,
                );
            }
            ManagerCommand::Shutdown => {
                info!("[flowdeck] Shutdown requested");
                registry.close_all(WatchClosed::Shutdown);
                tracker.fail_all(ResetError::Closed(ManagerClosed));
                exit.write(AppExit::Success);
            }
        }
    }
}

/// Ingest device events written as Bevy messages by in-app producers.
pub(crate) fn ingest_device_messages<RT: Runtime>(
    mut events: MessageReader<DeviceEvent>,
    mut store: ResMut<PositionStore>,
    launcher: Res<LauncherResource>,
    runtime: Res<ManagerRuntime<RT>>,
    handle: Res<ManagerHandle>,
) {
    for event in events.read() {
        ingest_event(&mut store, event, &launcher, &runtime, &handle);
    }
}

fn ingest_event<RT: Runtime>(
    store: &mut PositionStore,
    event: &DeviceEvent,
    launcher: &LauncherResource,
    runtime: &ManagerRuntime<RT>,
    handle: &ManagerHandle,
) {
    match state_machine::apply_device_event(store, event) {
        Ok(Applied::Registered) => {
            debug!(
                "[flowdeck] Position {} registered; launching software",
                event.position_name()
            );
            reset::spawn_start(
                event.position_name().to_string(),
                launcher,
                runtime,
                handle,
            );
        }
        Ok(_) => {}
        // Rejected events are recorded and the position keeps its last
        // valid state; masking them could hide a real hardware fault.
        Err(err) => warn!("[flowdeck] {err}"),
    }
}
