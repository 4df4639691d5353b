// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use event_listener::Event;
use parking_lot::Mutex;

/// The lifecycle phase of a subsystem that supports two-phase shutdown.
///
/// Phases are ordered: `Running < Draining < Forced`. A gate only ever
/// moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Accepting new work.
    Running,
    /// Refusing new work, waiting for in-flight work to finish.
    Draining,
    /// In-flight work has been cancelled; leftovers are being reaped.
    Forced,
}

/// The shutdown phase machine shared by a subsystem and its tasks.
///
/// Entry points call [`is_shutdown`](Gate::is_shutdown) (and re-check it
/// under their registry lock) to refuse work once draining has begun.
/// Long-running tasks race their work against [`forced`](Gate::forced),
/// which acts as the root cancellation handle: when the forced phase is
/// entered, every such race resolves and the losing work future is
/// dropped, aborting it.
#[derive(Debug, Default)]
pub struct Gate {
    phase: Mutex<Phase>,
    changed: Event,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Running
    }
}

impl Gate {
    /// Creates a gate in the [`Phase::Running`] phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Returns true once draining has begun (phase is `Draining` or later).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.phase() >= Phase::Draining
    }

    /// Transitions `Running → Draining`.
    ///
    /// Returns true if this call performed the transition, false if the
    /// gate had already left the running phase.
    pub fn begin_drain(&self) -> bool {
        self.advance(Phase::Draining)
    }

    /// Transitions to `Forced`, cancelling in-flight work racing
    /// [`forced`](Gate::forced).
    ///
    /// Returns true if this call performed the transition.
    pub fn force(&self) -> bool {
        self.advance(Phase::Forced)
    }

    fn advance(&self, to: Phase) -> bool {
        let mut phase = self.phase.lock();
        if *phase >= to {
            return false;
        }
        *phase = to;
        drop(phase);
        self.changed.notify(usize::MAX);
        true
    }

    /// Resolves once the gate reaches [`Phase::Draining`] or later.
    pub async fn draining(&self) {
        self.reached(Phase::Draining).await;
    }

    /// Resolves once the gate reaches [`Phase::Forced`].
    pub async fn forced(&self) {
        self.reached(Phase::Forced).await;
    }

    async fn reached(&self, at_least: Phase) {
        loop {
            if self.phase() >= at_least {
                return;
            }
            // Register before re-checking so a transition between the check
            // and the await cannot be missed.
            let listener = self.changed.listen();
            if self.phase() >= at_least {
                return;
            }
            listener.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Gate: Send, Sync);
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Running < Phase::Draining);
        assert!(Phase::Draining < Phase::Forced);
    }

    #[test]
    fn transitions_only_advance() {
        let gate = Gate::new();
        assert!(!gate.is_shutdown());

        assert!(gate.begin_drain());
        assert!(!gate.begin_drain());
        assert_eq!(gate.phase(), Phase::Draining);
        assert!(gate.is_shutdown());

        assert!(gate.force());
        assert!(!gate.force());
        assert!(!gate.begin_drain());
        assert_eq!(gate.phase(), Phase::Forced);
    }

    #[test]
    fn force_skips_draining() {
        let gate = Gate::new();
        assert!(gate.force());
        assert!(gate.is_shutdown());
    }

    #[tokio::test]
    async fn draining_wakes_waiters() {
        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.draining().await })
        };

        tokio::task::yield_now().await;
        gate.begin_drain();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn forced_ignores_draining() {
        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.forced().await })
        };

        gate.begin_drain();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.force();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn already_forced_resolves_immediately() {
        let gate = Gate::new();
        gate.force();
        gate.draining().await;
        gate.forced().await;
    }
}
