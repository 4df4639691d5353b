// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use filer::BufferFile;
use futures::future::BoxFuture;

use crate::body::SectionReader;
use crate::error::BoxError;

/// The external cache consulted before, and populated after, a fetch.
///
/// The client owns neither the cache's storage nor its eviction policy;
/// it only drives these two operations. Both run under the fetch task,
/// so a forced client shutdown cancels them by dropping the returned
/// future — implementations need no explicit cancellation hook.
///
/// Errors from either operation become the fetcher's terminal error and
/// are delivered to every waiter.
pub trait CacheStore: Send + Sync + 'static {
    /// Looks up `url`. On a hit, writes the cached bytes into `sink` and
    /// resolves to `true`; on a miss, resolves to `false` without
    /// touching the sink.
    fn get<'a>(&'a self, url: &'a str, sink: &'a mut BufferFile) -> BoxFuture<'a, Result<bool, BoxError>>;

    /// Stores the body of a successful fetch of `url`.
    ///
    /// `source` yields exactly `len` bytes; consuming a different count
    /// is an error on the implementation's side.
    fn put<'a>(&'a self, url: &'a str, source: SectionReader<'a>, len: u64) -> BoxFuture<'a, Result<(), BoxError>>;
}
