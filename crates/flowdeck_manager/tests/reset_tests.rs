use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bevy::prelude::*;
use bevy::tasks::{TaskPool, TaskPoolBuilder};
use flowdeck_manager::{
    async_channel, async_trait, DeviceEvent, FlowDeckPlugin, LauncherError, LauncherResource,
    ManagerHandle, ManagerRuntime, PositionState, PositionStore, ResetError, ResetOutcome,
    ResetSettings, SoftwareLauncher,
};

/// Launcher whose `stop` blocks until the test releases the gate, recording
/// every call on the way.
struct GatedLauncher {
    start_calls: Mutex<Vec<String>>,
    stop_calls: Mutex<Vec<String>>,
    gate: async_channel::Receiver<()>,
}

impl GatedLauncher {
    fn new() -> (Arc<Self>, async_channel::Sender<()>) {
        let (gate_tx, gate_rx) = async_channel::unbounded();
        (
            Arc::new(Self {
                start_calls: Mutex::new(Vec::new()),
                stop_calls: Mutex::new(Vec::new()),
                gate: gate_rx,
            }),
            gate_tx,
        )
    }

    fn stop_count(&self) -> usize {
        self.stop_calls.lock().unwrap().len()
    }

    fn start_count(&self) -> usize {
        self.start_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SoftwareLauncher for GatedLauncher {
    async fn start(&self, position_name: &str) -> Result<(), LauncherError> {
        self.start_calls
            .lock()
            .unwrap()
            .push(position_name.to_string());
        Ok(())
    }

    async fn stop(&self, position_name: &str) -> Result<(), LauncherError> {
        self.stop_calls
            .lock()
            .unwrap()
            .push(position_name.to_string());
        let _ = self.gate.recv().await;
        Ok(())
    }
}

fn create_test_app_with_timeout(
    launcher: Arc<dyn SoftwareLauncher>,
    stop_timeout: Duration,
) -> (App, ManagerHandle) {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.insert_resource(ManagerRuntime(
        TaskPoolBuilder::new().num_threads(2).build(),
    ));
    app.insert_resource(LauncherResource(launcher));
    app.insert_resource(ResetSettings { stop_timeout });
    app.add_plugins(FlowDeckPlugin::<TaskPool>::default());
    let handle = app.world().resource::<ManagerHandle>().clone();
    (app, handle)
}

fn create_test_app(launcher: Arc<dyn SoftwareLauncher>) -> (App, ManagerHandle) {
    // Generous bound so only the dedicated timeout test ever hits it.
    create_test_app_with_timeout(launcher, Duration::from_secs(5))
}

/// Pump the app until the future resolves.
fn drive<T>(app: &mut App, fut: impl Future<Output = T>) -> T {
    let mut fut = pin!(fut);
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..500 {
        if let Poll::Ready(value) = fut.as_mut().poll(&mut cx) {
            return value;
        }
        app.update();
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("future did not resolve while pumping the app");
}

/// Pump the app until both futures resolve.
fn drive_pair<T, U>(
    app: &mut App,
    first: impl Future<Output = T>,
    second: impl Future<Output = U>,
) -> (T, U) {
    let mut first = pin!(first);
    let mut second = pin!(second);
    let mut first_result = None;
    let mut second_result = None;
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..500 {
        if first_result.is_none() {
            if let Poll::Ready(value) = first.as_mut().poll(&mut cx) {
                first_result = Some(value);
            }
        }
        if second_result.is_none() {
            if let Poll::Ready(value) = second.as_mut().poll(&mut cx) {
                second_result = Some(value);
            }
        }
        if first_result.is_some() && second_result.is_some() {
            return (first_result.take().unwrap(), second_result.take().unwrap());
        }
        app.update();
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("futures did not resolve while pumping the app");
}

fn state_of(app: &App, name: &str) -> Option<PositionState> {
    app.world()
        .resource::<PositionStore>()
        .position(name)
        .map(|position| position.state.clone())
}

fn setup_running(app: &mut App, handle: &ManagerHandle, name: &str, removable: bool) {
    handle.report(DeviceEvent::HardwareDetected {
        name: name.to_string(),
        location: None,
        removable,
    });
    app.update();
    handle.report(DeviceEvent::SoftwareReady {
        name: name.to_string(),
        rpc_endpoints: vec![8000],
    });
    app.update();
    assert!(state_of(app, name).unwrap().is_running());
}

#[test]
fn reset_of_unknown_position_reports_not_found() {
    let (launcher, _gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher);

    let watch = drive(&mut app, handle.watch()).unwrap();
    let result = drive(&mut app, handle.reset("ghost", false));
    assert_eq!(
        result,
        Err(ResetError::NotFound {
            position_name: "ghost".to_string()
        })
    );

    // No store mutation, no diff to any subscriber.
    app.update();
    assert_eq!(watch.try_recv().unwrap(), None);
    let snapshot = drive(&mut app, handle.snapshot()).unwrap();
    assert_eq!(snapshot.total_count, 0);
}

#[test]
fn unforced_reset_of_running_position_is_refused() {
    let (launcher, _gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher.clone());
    setup_running(&mut app, &handle, "X1", false);

    let result = drive(&mut app, handle.reset("X1", false));
    assert_eq!(
        result,
        Err(ResetError::Running {
            position_name: "X1".to_string()
        })
    );
    assert!(state_of(&app, "X1").unwrap().is_running());
    assert_eq!(launcher.stop_count(), 0);
}

#[test]
fn forced_reset_restarts_a_running_position() {
    let (launcher, gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher.clone());
    setup_running(&mut app, &handle, "X1", false);

    // The initial launch is asynchronous; settle it before counting.
    for _ in 0..100 {
        if launcher.start_count() == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let starts_before = launcher.start_count();
    assert_eq!(starts_before, 1);

    let mut fut = pin!(handle.reset("X1", true));
    let mut cx = Context::from_waker(Waker::noop());
    assert!(fut.as_mut().poll(&mut cx).is_pending());
    app.update();

    // Stop is in flight; the position must be visibly RESETTING meanwhile.
    assert_eq!(state_of(&app, "X1"), Some(PositionState::Resetting));
    for _ in 0..100 {
        if launcher.stop_count() == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(launcher.stop_count(), 1);

    gate.try_send(()).unwrap();
    let result = drive(&mut app, fut);
    assert_eq!(result, Ok(ResetOutcome::Restarted));
    assert_eq!(state_of(&app, "X1"), Some(PositionState::Initialising));

    // The software is launched again for the re-initialising position.
    for _ in 0..100 {
        if launcher.start_count() > starts_before {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(launcher.start_count(), starts_before + 1);
}

#[test]
fn reset_after_unplug_removes_the_position() {
    let (launcher, gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher);
    setup_running(&mut app, &handle, "MN12345", true);

    handle.report(DeviceEvent::HardwareUnplugged {
        name: "MN12345".to_string(),
    });
    app.update();
    assert_eq!(state_of(&app, "MN12345"), Some(PositionState::HardwareRemoved));

    // HARDWARE_REMOVED is not RUNNING, so no force is needed.
    gate.try_send(()).unwrap();
    let result = drive(&mut app, handle.reset("MN12345", false));
    assert_eq!(result, Ok(ResetOutcome::Removed));
    assert_eq!(state_of(&app, "MN12345"), None);

    let snapshot = drive(&mut app, handle.snapshot()).unwrap();
    assert_eq!(snapshot.total_count, 0);
}

#[test]
fn reset_timeout_parks_the_position_in_software_error() {
    // Gate never released: the stop hangs past the 100ms bound.
    let (launcher, _gate) = GatedLauncher::new();
    let (mut app, handle) =
        create_test_app_with_timeout(launcher, Duration::from_millis(100));
    setup_running(&mut app, &handle, "X1", false);

    let result = drive(&mut app, handle.reset("X1", true));
    assert_eq!(
        result,
        Err(ResetError::Timeout {
            position_name: "X1".to_string(),
            waited_ms: 100,
        })
    );

    // Never left wedged in RESETTING; parked with a description instead.
    let state = state_of(&app, "X1").unwrap();
    match state {
        PositionState::SoftwareError { error_info } => {
            assert!(error_info.contains("did not stop"));
        }
        other => panic!("expected SOFTWARE_ERROR, got {other}"),
    }
}

#[test]
fn duplicate_resets_share_one_stop_invocation() {
    let (launcher, gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher.clone());
    setup_running(&mut app, &handle, "X1", false);

    // The gate holds one permit, so only one stop can ever get through.
    gate.try_send(()).unwrap();

    let first = handle.reset("X1", true);
    let second = handle.reset("X1", true);
    let (first_result, second_result) = drive_pair(&mut app, first, second);
    assert_eq!(first_result, Ok(ResetOutcome::Restarted));
    assert_eq!(second_result, Ok(ResetOutcome::Restarted));
    assert_eq!(launcher.stop_count(), 1);
}

#[test]
fn shutdown_fails_pending_resets() {
    let (launcher, _gate) = GatedLauncher::new();
    let (mut app, handle) = create_test_app(launcher);
    setup_running(&mut app, &handle, "X1", false);

    let mut fut = pin!(handle.reset("X1", true));
    let mut cx = Context::from_waker(Waker::noop());
    assert!(fut.as_mut().poll(&mut cx).is_pending());
    app.update();

    handle.shutdown();
    app.update();

    let result = drive(&mut app, fut);
    assert!(matches!(result, Err(ResetError::Closed(_))));
}
