// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use filer::BufferFile;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use quiesce::Latch;

use crate::error::Error;

/// Response metadata shallow-copied to each waiter.
#[derive(Debug, Clone)]
pub(crate) struct ResponseMeta {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
}

/// The single-flight record for one URL.
///
/// Exactly one fetcher per URL exists in the client's registry at a
/// time. It owns the buffered body, the completion signal, and the
/// count of outstanding response bodies; when that count reaches zero
/// the registry entry is removed and the buffer released.
pub(crate) struct Fetcher {
    url: String,
    done: Latch,
    state: Mutex<FetcherState>,
}

#[derive(Default)]
pub(crate) struct FetcherState {
    /// Callers that have entered the fetch but not yet closed their
    /// response body. Guarded here, driven only under the client's
    /// registry lock.
    pub(crate) reqs: usize,
    /// The buffered body, shared read-only once `done` opens. `None`
    /// until the fetch task publishes it, and again after teardown.
    pub(crate) buffer: Option<Arc<BufferFile>>,
    /// Real HTTP response metadata; `None` after a cache hit, for which
    /// waiters synthesize a minimal 200 response.
    pub(crate) meta: Option<ResponseMeta>,
    /// The terminal error, delivered identically to every waiter.
    pub(crate) error: Option<Error>,
}

impl Fetcher {
    pub(crate) fn new(url: String) -> Self {
        Self {
            url,
            done: Latch::new(),
            state: Mutex::new(FetcherState {
                reqs: 1,
                ..FetcherState::default()
            }),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn done(&self) -> &Latch {
        &self.done
    }

    pub(crate) fn state(&self) -> &Mutex<FetcherState> {
        &self.state
    }

    /// Publishes the fetch outcome and releases every waiter.
    ///
    /// If the fetcher was already reaped by a forced shutdown
    /// (`reqs == 0`), the buffer is discarded instead of published.
    pub(crate) fn finish(&self, buffer: BufferFile, meta: Option<ResponseMeta>, error: Option<Error>) {
        let discarded = {
            let mut state = self.state.lock();
            state.meta = meta;
            if state.error.is_none() {
                state.error = error;
            }
            if state.reqs == 0 {
                Some(buffer)
            } else {
                state.buffer = Some(Arc::new(buffer));
                None
            }
        };
        drop(discarded);
        self.done.open();
    }
}

impl core::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Fetcher")
            .field("url", &self.url)
            .field("reqs", &state.reqs)
            .field("done", &self.done.is_open())
            .finish_non_exhaustive()
    }
}
