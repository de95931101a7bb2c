//! flowdeck_manager
//!
//! Position lifecycle engine and watch middleware for the flowdeck fleet
//! manager: the authoritative view of every flow cell position, the state
//! machine that guards its lifecycle, and the broker that streams
//! additions/changes/removals to any number of subscribers.
//!
//! This crate is deliberately transport-free: it exposes
//!
//! - [`FlowDeckPlugin`]: wires the store, state machine, watch broker and
//!   reset orchestration into a (headless) Bevy app.
//! - [`ManagerHandle`]: cloneable, channel-backed entry point for
//!   snapshot/watch/reset calls and device event ingestion.
//! - [`WatchStream`]: one subscriber's loss-free diff stream; replaying it
//!   from subscription start reconstructs the current snapshot exactly.
//! - [`SoftwareLauncher`]: the seam to whatever supervises per-position
//!   software.
//!
//! All store mutation is serialized through one chained system sequence
//! ([`FlowDeckSystems`]), so no subscriber can ever receive a diff for a
//! state a snapshot could not have observed. Subscriber delivery uses
//! bounded mailboxes; a consumer that stays behind past the configured
//! backlog is disconnected instead of stalling anyone else.
//!
//! ```rust,ignore
//! use bevy::prelude::*;
//! use bevy::tasks::{TaskPool, TaskPoolBuilder};
//! use flowdeck_manager::{FlowDeckPlugin, LauncherResource, ManagerHandle, ManagerRuntime};
//!
//! let mut app = App::new();
//! app.add_plugins(MinimalPlugins);
//! app.insert_resource(ManagerRuntime(TaskPoolBuilder::new().num_threads(2).build()));
//! app.insert_resource(LauncherResource(std::sync::Arc::new(MyLauncher)));
//! app.add_plugins(FlowDeckPlugin::<TaskPool>::default());
//!
//! let handle = app.world().resource::<ManagerHandle>().clone();
//! // hand `app` to its runner, use `handle` from anywhere
//! ```

mod facade;
mod reset;
mod runtime;
mod state_machine;
mod store;
mod watch;

pub use facade::ManagerHandle;
pub use reset::{LauncherError, LauncherResource, ResetSettings, SoftwareLauncher};
pub use runtime::{ManagerRuntime, Runtime};
pub use state_machine::{DeviceEvent, TransitionError};
pub use store::{PositionRecord, PositionStore, StoreUpdate};
pub use watch::{SubscriberId, WatchSettings, WatchStream};

// Wire-level vocabulary, re-exported for convenience
pub use flowdeck_common::*;

pub use async_channel;
pub use async_trait::async_trait;

use std::marker::PhantomData;

use bevy::prelude::*;
use bevy::tasks::TaskPool;

/// System sets the engine runs in, chained in declaration order so
/// downstream apps can schedule around them.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlowDeckSystems {
    /// Drain external commands and device events; mutate the store.
    Inbound,
    /// Drive in-flight reset sequences to their terminal transitions.
    Orchestrate,
    /// Turn journalled mutations into per-subscriber diffs and deliver them.
    Publish,
}

/// Top-level plugin that adds the engine's resources and systems.
///
/// The app must also provide a [`ManagerRuntime`] and a
/// [`LauncherResource`] (plus Bevy's `MinimalPlugins` for time and
/// scheduling). [`WatchSettings`] and [`ResetSettings`] may be inserted
/// before the plugin to override their defaults.
pub struct FlowDeckPlugin<RT: Runtime = TaskPool> {
    _marker: PhantomData<RT>,
}

impl<RT: Runtime> Default for FlowDeckPlugin<RT> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<RT: Runtime> Plugin for FlowDeckPlugin<RT> {
    fn build(&self, app: &mut App) {
        // Settings first; the registry's flush timer is derived from them.
        app.init_resource::<watch::WatchSettings>();
        app.init_resource::<reset::ResetSettings>();

        let flush_rate = app.world().resource::<watch::WatchSettings>().flush_rate_hz;
        app.insert_resource(watch::WatchRegistry::new(flush_rate));

        app.init_resource::<store::PositionStore>();
        app.init_resource::<reset::ResetTracker>();

        let (handle, commands) = facade::ManagerHandle::channel();
        app.insert_resource(handle);
        app.insert_resource(commands);

        app.add_message::<state_machine::DeviceEvent>();

        app.configure_sets(
            Update,
            (
                FlowDeckSystems::Inbound,
                FlowDeckSystems::Orchestrate,
                FlowDeckSystems::Publish,
            )
                .chain(),
        )
        .add_systems(
            Update,
            (
                facade::process_commands::<RT>,
                facade::ingest_device_messages::<RT>,
                watch::process_unsubscribes,
            )
                .in_set(FlowDeckSystems::Inbound),
        )
        .add_systems(
            Update,
            reset::complete_resets::<RT>.in_set(FlowDeckSystems::Orchestrate),
        )
        .add_systems(
            Update,
            (watch::track_store_updates, watch::flush_watch_queues)
                .chain()
                .in_set(FlowDeckSystems::Publish),
        );
    }
}
