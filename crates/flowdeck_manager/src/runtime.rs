use std::future::Future;

use bevy::prelude::*;

/// Abstraction over whatever drives the launcher collaborator's futures.
///
/// Bevy's [`TaskPool`](bevy::tasks::TaskPool) is the default runtime; a
/// deployment embedding flowdeck in another executor only has to implement
/// this one method.
pub trait Runtime: Send + Sync + 'static {
    /// Spawn a detached task.
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static);
}

/// Resource wrapping the runtime the manager spawns collaborator calls on.
#[derive(Resource)]
pub struct ManagerRuntime<RT: Runtime>(pub RT);

impl Runtime for bevy::tasks::TaskPool {
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        tracing::debug!("[TaskPool::spawn] Spawning and detaching task");
        let task = self.spawn(task);
        task.detach();
    }
}
