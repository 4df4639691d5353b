// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};

use event_listener::Event;

/// A one-shot completion signal.
///
/// A latch starts closed. [`open`](Latch::open) releases every current and
/// future waiter atomically; it is idempotent, so racing openers are
/// harmless. Once open, a latch never closes again.
#[derive(Debug, Default)]
pub struct Latch {
    opened: AtomicBool,
    event: Event,
}

impl Latch {
    /// Creates a closed latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Opens the latch, waking all waiters.
    ///
    /// Returns true if this call opened the latch, false if it was
    /// already open.
    pub fn open(&self) -> bool {
        if self
            .opened
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.event.notify(usize::MAX);
        true
    }

    /// Resolves once the latch is open.
    pub async fn wait(&self) {
        loop {
            if self.is_open() {
                return;
            }
            // Register before re-checking so an open between the check and
            // the await cannot be missed.
            let listener = self.event.listen();
            if self.is_open() {
                return;
            }
            listener.await;
        }
    }
}
