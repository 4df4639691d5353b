// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use thiserror::Error;

/// A type-erased error from an external collaborator (the HTTP transport
/// or the cache).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Any error that may arise from a fetch.
///
/// The type is `Clone`: a fetcher's terminal error is delivered
/// identically to every waiter coalesced onto it, so the underlying
/// collaborator errors are reference-counted.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The operation was denied because the client is shutting down, or
    /// an in-flight fetch was aborted by a forced shutdown.
    #[error("operation canceled by shutdown")]
    Canceled,

    /// The HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(Arc<BoxError>),

    /// The external cache failed during lookup or store.
    #[error("cache error: {0}")]
    Cache(Arc<BoxError>),

    /// Buffering the response body failed.
    #[error(transparent)]
    File(#[from] filer::Error),
}

/// A specialized `Result` for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn transport(error: impl Into<BoxError>) -> Self {
        Self::Transport(Arc::new(error.into()))
    }

    pub(crate) fn cache(error: impl Into<BoxError>) -> Self {
        Self::Cache(Arc::new(error.into()))
    }
}
