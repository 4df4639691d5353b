// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::future::BoxFuture;

/// Trait for spawning the client's fetch tasks on an async runtime.
///
/// The client is runtime-agnostic; it hands every fetch task to the
/// configured spawner. The task is boxed so the spawner can be held as a
/// trait object.
pub trait Spawner: Send + Sync + 'static {
    /// Spawns a fire-and-forget task.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// [`Spawner`] implementation for the Tokio runtime.
///
/// # Panics
///
/// Panics if a task is spawned outside of a Tokio runtime context.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(feature = "tokio")]
impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        drop(tokio::spawn(task));
    }
}
