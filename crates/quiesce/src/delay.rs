// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use crate::Latch;

/// Returns a future that resolves after `duration`.
///
/// The timer is served by a dedicated short-lived thread rather than a
/// runtime timer wheel, so it works on any executor (or none). That makes
/// it suitable for the infrequent, coarse waits of a shutdown path — the
/// grace window between cancelling work and force-reaping it — and
/// unsuitable as a general-purpose timer.
///
/// The thread is spawned eagerly and runs to completion even if the
/// returned future is dropped early.
pub fn delay(duration: Duration) -> impl Future<Output = ()> + Send + 'static {
    let fired = Arc::new(Latch::new());
    let signal = Arc::clone(&fired);
    std::thread::Builder::new()
        .name("quiesce-delay".into())
        .spawn(move || {
            std::thread::sleep(duration);
            signal.open();
        })
        .expect("failed to spawn delay thread");
    async move { fired.wait().await }
}
