// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Any error that may arise from a [`Filer`](crate::Filer), a
/// [`File`](crate::File), or a [`BufferFile`](crate::BufferFile).
///
/// The type is `Clone` because a recorded error may be handed back more
/// than once: a `BufferFile` that enters its sticky error state returns
/// the same error from every subsequent operation until it is closed.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The operation was denied because the owning subsystem is shutting
    /// down, or an in-flight operation was aborted by a forced shutdown.
    #[error("operation canceled by shutdown")]
    Canceled,

    /// A close was attempted on a handle that is already closed.
    #[error("file already closed")]
    AlreadyClosed,

    /// I/O was attempted on a handle whose descriptor is gone — the
    /// handle was closed, or reaped by a forced shutdown.
    #[error("file handle has no open descriptor")]
    Invalid,

    /// We are forwarding an error received from the operating system.
    #[error("{0}")]
    Io(Arc<io::Error>),
}

/// A specialized `Result` for filer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Represents a filer error as a standard I/O error, for interoperating
/// with libraries that expect one.
impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::Io(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, value)
    }
}
