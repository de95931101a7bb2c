use std::sync::Arc;
use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use bevy::tasks::{TaskPool, TaskPoolBuilder};
use flowdeck_manager::{
    async_trait, DeviceEvent, FlowDeckPlugin, GridCoordinate, LauncherError, LauncherResource,
    ManagerHandle, ManagerRuntime, SoftwareLauncher,
};

/// Simulated deployment: one integrated slot and one removable unit walk
/// through detection, readiness, an endpoint refresh, a hot unplug and a
/// reset, while a watch consumer logs every delivered diff.
///
/// Run with:
///   cargo run -p sim_server
fn main() {
    let mut app = App::new();

    // Headless app running at 60 FPS
    app.add_plugins((
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
            1.0 / 60.0,
        ))),
        bevy::log::LogPlugin::default(),
    ));

    app.insert_resource(ManagerRuntime(
        TaskPoolBuilder::new().num_threads(2).build(),
    ));
    app.insert_resource(LauncherResource(Arc::new(SimLauncher)));
    app.add_plugins(FlowDeckPlugin::<TaskPool>::default());

    app.add_systems(Startup, start_watch_consumer);
    app.add_systems(Update, drive_scenario);

    app.run();
}

struct SimLauncher;

#[async_trait]
impl SoftwareLauncher for SimLauncher {
    async fn start(&self, position_name: &str) -> Result<(), LauncherError> {
        info!("[sim] starting software for {position_name}");
        Ok(())
    }

    async fn stop(&self, position_name: &str) -> Result<(), LauncherError> {
        info!("[sim] stopping software for {position_name}");
        Ok(())
    }
}

/// Consume one watch stream on its own thread and log every diff.
fn start_watch_consumer(handle: Res<ManagerHandle>) {
    let handle = handle.clone();
    std::thread::spawn(move || {
        futures_lite::future::block_on(async move {
            let Ok(stream) = handle.watch().await else {
                return;
            };
            loop {
                match stream.recv().await {
                    Ok(event) => {
                        for position in &event.additions {
                            info!(
                                "[watch] + {} {} endpoints={:?}",
                                position.name,
                                position.state,
                                position.state.rpc_endpoints()
                            );
                        }
                        for position in &event.changes {
                            info!("[watch] ~ {} {}", position.name, position.state);
                        }
                        for name in &event.removals {
                            info!("[watch] - {name}");
                        }
                    }
                    Err(reason) => {
                        info!("[watch] stream ended: {reason}");
                        break;
                    }
                }
            }
        });
    });
}

/// Scripted hardware/software timeline, one stage per threshold.
fn drive_scenario(
    time: Res<Time>,
    mut elapsed: Local<f32>,
    mut stage: Local<usize>,
    mut events: MessageWriter<DeviceEvent>,
    handle: Res<ManagerHandle>,
) {
    *elapsed += time.delta_secs();

    let thresholds = [0.5f32, 1.0, 1.5, 2.5, 3.0, 4.5];
    while *stage < thresholds.len() && *elapsed >= thresholds[*stage] {
        match *stage {
            0 => {
                events.write(DeviceEvent::HardwareDetected {
                    name: "X1".to_string(),
                    location: Some(GridCoordinate { x: 0, y: 0 }),
                    removable: false,
                });
                events.write(DeviceEvent::HardwareDetected {
                    name: "MN12345".to_string(),
                    location: None,
                    removable: true,
                });
            }
            1 => {
                events.write(DeviceEvent::SoftwareReady {
                    name: "X1".to_string(),
                    rpc_endpoints: vec![9501],
                });
                events.write(DeviceEvent::SoftwareReady {
                    name: "MN12345".to_string(),
                    rpc_endpoints: vec![9502],
                });
            }
            2 => {
                // Endpoint refresh while RUNNING
                events.write(DeviceEvent::SoftwareReady {
                    name: "MN12345".to_string(),
                    rpc_endpoints: vec![9502, 9503],
                });
            }
            3 => {
                events.write(DeviceEvent::HardwareUnplugged {
                    name: "MN12345".to_string(),
                });
            }
            4 => {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    futures_lite::future::block_on(async move {
                        match handle.reset("MN12345", false).await {
                            Ok(outcome) => info!("[sim] reset finished: {outcome:?}"),
                            Err(err) => warn!("[sim] reset failed: {err}"),
                        }
                    });
                });
            }
            5 => {
                info!("[sim] scenario complete; shutting down");
                handle.shutdown();
            }
            _ => {}
        }
        *stage += 1;
    }
}
