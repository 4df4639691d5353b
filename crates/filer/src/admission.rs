// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use event_listener::Event;
use parking_lot::Mutex;

#[derive(Debug)]
struct Pool {
    capacity: usize,
    available: Mutex<usize>,
    returned: Event,
}

/// The bounded pool of file-descriptor admission tokens.
///
/// One token must be held for each open descriptor. Acquisition is async
/// and blocks (the task, not the thread) until a token is returned.
#[derive(Clone)]
pub(crate) struct Admission {
    pool: Arc<Pool>,
}

impl Admission {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(Pool {
                capacity,
                available: Mutex::new(capacity),
                returned: Event::new(),
            }),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.pool.capacity
    }

    /// Number of tokens currently held.
    pub(crate) fn in_use(&self) -> usize {
        self.pool.capacity - *self.pool.available.lock()
    }

    /// Acquires one token, waiting until the pool has capacity.
    pub(crate) async fn acquire(&self) -> Token {
        loop {
            if let Some(token) = self.try_acquire() {
                return token;
            }
            // Register before re-checking so a token returned between the
            // check and the await cannot be missed.
            let listener = self.pool.returned.listen();
            if let Some(token) = self.try_acquire() {
                return token;
            }
            listener.await;
        }
    }

    fn try_acquire(&self) -> Option<Token> {
        let mut available = self.pool.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(Token {
            pool: Arc::clone(&self.pool),
        })
    }
}

impl core::fmt::Debug for Admission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Admission")
            .field("capacity", &self.pool.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One unit of file-descriptor capacity, returned to the pool on drop.
#[derive(Debug)]
pub(crate) struct Token {
    pool: Arc<Pool>,
}

impl Drop for Token {
    fn drop(&mut self) {
        *self.pool.available.lock() += 1;
        self.pool.returned.notify(1);
    }
}
