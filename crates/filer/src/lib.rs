// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! File-descriptor-budgeted async file handles.
//!
//! This crate provides a [`Filer`], a factory for files that manages
//! load on file descriptors. It differs from opening files directly in
//! three key ways:
//!
//! 1. **Bounded descriptor use.** The filer holds a pool of admission
//!    tokens, one per open descriptor. Opens suspend until the pool has
//!    capacity instead of failing with `EMFILE`, so a subsystem can be
//!    granted a fixed descriptor budget and trusted not to exceed it.
//!
//! 2. **Fully asynchronous.** Every I/O operation is `async`. Blocking
//!    filesystem syscalls run on a small pool of worker threads that
//!    start on demand and exit when idle, keeping the async executor
//!    free.
//!
//! 3. **Deterministic shutdown.** [`Filer::shutdown`] drains the filer:
//!    new opens are refused, in-flight handles are waited for, and when
//!    the supplied cancel future fires the leftovers are forcibly
//!    closed — each one logged with the origin of the call that opened
//!    it, so leaks are attributable.
//!
//! # Buffer files
//!
//! [`Filer::buffer_file`] creates a [`BufferFile`], a seekable
//! read/write container whose first `mem_size` bytes live in memory.
//! Small payloads never touch the disk and never consume a descriptor;
//! larger ones spill transparently to a filer-owned temporary file.
//!
//! # Quick start
//!
//! ```no_run
//! # futures::executor::block_on(async {
//! let filer = filer::Filer::new(0); // 0 = 90% of the process limit
//!
//! let mut file = filer.temp_file("report-", ".tmp").await?;
//! file.write_slice(b"line 1\n").await?;
//! file.close().await?; // returns the token, unlinks the temp file
//!
//! let mut buffer = filer.buffer_file(0);
//! buffer.write(b"fits in memory, no descriptor held").await?;
//! buffer.close().await?;
//! # Ok::<(), filer::Error>(())
//! # });
//! ```

pub use std::io::SeekFrom;

pub use crate::buffer_file::BufferFile;
pub use crate::error::{Error, Result};
pub use crate::file::File;
pub use crate::filer::Filer;

mod admission;
mod buffer_file;
mod error;
mod file;
mod filer;
mod io_pool;
mod temp_name;

#[cfg(feature = "test-util")]
pub mod testing;
