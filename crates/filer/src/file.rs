// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::filer::Filer;

/// An open file managed by a [`Filer`].
///
/// A `File` holds one admission token from its filer's descriptor budget
/// until it is closed. All I/O is async; the blocking syscalls run on
/// the filer's worker pool, with cursor-affecting operations taking
/// `&mut self` so only one can be in flight at a time. Positional reads
/// ([`read_at`](File::read_at)) take `&self` and leave the cursor alone.
///
/// Unlike a [`std::fs::File`], the [`close`](File::close) method should
/// be called on a `File`: dropping an unclosed handle reclaims the
/// descriptor (and unlinks a temp file), but swallows any close error.
#[derive(Debug)]
pub struct File {
    filer: Filer,
    id: u64,
    file: Arc<Mutex<Option<std::fs::File>>>,
    path: PathBuf,
    is_temp: bool,
    closed: bool,
}

#[allow(
    clippy::needless_pass_by_ref_mut,
    reason = "&mut self enforces sequential cursor access across the worker-pool boundary"
)]
impl File {
    pub(crate) fn new(filer: Filer, id: u64, file: Arc<Mutex<Option<std::fs::File>>>, path: PathBuf, is_temp: bool) -> Self {
        Self {
            filer,
            id,
            file,
            path,
            is_temp,
            closed: false,
        }
    }

    /// The path this handle was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if this is a temporary file, unlinked on close.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.is_temp
    }

    /// Reads up to `len` bytes from the cursor in a single read.
    ///
    /// An empty result means end of file.
    pub async fn read(&mut self, len: usize) -> Result<Bytes> {
        self.with_file(move |f| {
            let mut buf = vec![0u8; len];
            let n = f.read(&mut buf)?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await
    }

    /// Reads from the cursor into `buf`, returning the count read.
    pub async fn read_slice(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.read(buf.len()).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Reads up to `len` bytes at `offset` without moving the cursor.
    pub async fn read_at(&self, len: usize, offset: u64) -> Result<Bytes> {
        self.with_file(move |f| {
            let mut buf = vec![0u8; len];
            let n = positional_read(f, &mut buf, offset)?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await
    }

    /// Writes all of `data` at the cursor.
    ///
    /// Returns the number of bytes written, which is always `data.len()`
    /// on success.
    pub async fn write(&mut self, data: Bytes) -> Result<usize> {
        let len = data.len();
        self.with_file(move |f| f.write_all(&data)).await?;
        Ok(len)
    }

    /// Copies `data` and writes all of it at the cursor.
    pub async fn write_slice(&mut self, data: &[u8]) -> Result<usize> {
        self.write(Bytes::copy_from_slice(data)).await
    }

    /// Moves the cursor, returning the new position.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.with_file(move |f| f.seek(pos)).await
    }

    /// Returns the current cursor position.
    pub async fn stream_position(&mut self) -> Result<u64> {
        self.with_file(std::fs::File::stream_position).await
    }

    /// Queries metadata about the underlying file.
    pub async fn metadata(&self) -> Result<std::fs::Metadata> {
        self.with_file(|f| f.metadata()).await
    }

    /// Closes the handle: closes the descriptor, returns the admission
    /// token, and unlinks the file if it is temporary.
    ///
    /// A second close fails with [`Error::AlreadyClosed`], as does a
    /// close of a handle that was reaped by a forced shutdown.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        self.closed = true;
        let Some(entry) = self.filer.deregister(self.id) else {
            // Reaped by forced shutdown; the descriptor is already gone.
            return Err(Error::AlreadyClosed);
        };

        let cell = Arc::clone(&self.file);
        let path = self.path.clone();
        let is_temp = self.is_temp;
        let result: std::io::Result<()> = self
            .filer
            .io()
            .submit(move || {
                let file = cell.lock().take();
                drop(file);
                if is_temp {
                    std::fs::remove_file(&path)?;
                }
                Ok(())
            })
            .await;
        // The token is returned only after the descriptor is gone.
        drop(entry);
        self.filer.finish_close();
        result.map_err(Error::from)
    }

    async fn with_file<T: Send + 'static>(
        &self,
        op: impl FnOnce(&mut std::fs::File) -> std::io::Result<T> + Send + 'static,
    ) -> Result<T> {
        if self.closed {
            return Err(Error::Invalid);
        }
        let cell = Arc::clone(&self.file);
        self.filer
            .io()
            .submit(move || {
                let mut guard = cell.lock();
                match guard.as_mut() {
                    Some(file) => op(file).map_err(Error::from),
                    // Reaped by forced shutdown.
                    None => Err(Error::Invalid),
                }
            })
            .await
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(entry) = self.filer.deregister(self.id) else {
            return;
        };
        let file = entry.file.lock().take();
        drop(file);
        if entry.is_temp {
            let _ = std::fs::remove_file(&entry.path);
        }
        drop(entry);
        self.filer.finish_close();
    }
}

/// Reads bytes at `offset` without affecting the cursor.
#[cfg(unix)]
fn positional_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

/// Reads bytes at `offset`. `seek_read` moves the cursor on Windows, so
/// the position is saved and restored around the read.
#[cfg(windows)]
fn positional_read(file: &mut std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let saved = file.stream_position()?;
    let result = file.seek_read(buf, offset);
    file.seek(SeekFrom::Start(saved))?;
    result
}
