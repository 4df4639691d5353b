// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::io;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{Either, select};
use futures::pin_mut;
use parking_lot::Mutex;
use quiesce::{Gate, Latch};

use crate::admission::{Admission, Token};
use crate::buffer_file::BufferFile;
use crate::error::{Error, Result};
use crate::file::File;
use crate::io_pool::IoPool;
use crate::temp_name::TempNames;

/// How many create-exclusive attempts a temp-file open makes before
/// giving up and returning the collision error.
const TEMP_NAME_ATTEMPTS: usize = 1000;

/// The caller site recorded for a handle, reported during forced
/// shutdown so leaked handles can be traced to their origin.
pub(crate) type Origin = &'static Location<'static>;

/// A live-handle registry entry. Holds the admission token: dropping the
/// entry returns the token to the pool.
pub(crate) struct HandleEntry {
    pub(crate) file: Arc<Mutex<Option<std::fs::File>>>,
    pub(crate) path: PathBuf,
    pub(crate) is_temp: bool,
    pub(crate) origin: Origin,
    #[expect(dead_code, reason = "held for its Drop impl, which returns the admission token")]
    token: Token,
}

pub(crate) struct Shared {
    io: IoPool,
    admission: Admission,
    gate: Gate,
    drained: Latch,
    tempdir: Mutex<PathBuf>,
    names: Mutex<TempNames>,
    registry: Mutex<HashMap<u64, HandleEntry>>,
    next_id: AtomicU64,
}

/// A factory for files that manages load on file descriptors.
///
/// A `Filer` holds a bounded pool of admission tokens, one per open
/// descriptor. Open operations suspend (the task, never a thread) until
/// the pool has capacity, so a process cannot run past its descriptor
/// budget no matter how many tasks open files concurrently.
///
/// All I/O is async; the blocking syscalls run on a small worker pool
/// owned by the `Filer`, whose threads start on demand and exit when
/// idle. Cloning a `Filer` is cheap and clones share the pool, the
/// budget, and the shutdown state.
///
/// Every handle must be explicitly [`close`](File::close)d. Dropping an
/// unclosed handle still reclaims its descriptor, temp file, and token,
/// but close errors are only observable through `close`.
///
/// # Shutdown
///
/// [`shutdown`](Filer::shutdown) drains the filer in two phases: new
/// opens fail immediately with [`Error::Canceled`], and the call waits
/// until every registered handle is closed. If the supplied cancel
/// future fires first, remaining handles are forcibly closed (each one
/// logged with the origin of the call that opened it) and the call
/// returns [`Error::Canceled`].
///
/// # Example
///
/// ```no_run
/// # futures::executor::block_on(async {
/// let filer = filer::Filer::new(128);
///
/// let mut file = filer.temp_file("scratch-", ".bin").await?;
/// file.write_slice(b"some bytes").await?;
/// file.close().await?;
///
/// filer.shutdown(std::future::pending()).await?;
/// # Ok::<(), filer::Error>(())
/// # });
/// ```
#[derive(Clone)]
pub struct Filer {
    shared: Arc<Shared>,
}

impl Filer {
    /// Creates a `Filer` that will hold at most `fd_limit` descriptors
    /// open simultaneously.
    ///
    /// If `fd_limit` is 0, the budget defaults to 90% of the process's
    /// soft descriptor limit, or 90 if that cannot be determined.
    #[must_use]
    pub fn new(fd_limit: usize) -> Self {
        let fd_limit = if fd_limit == 0 { default_fd_limit() } else { fd_limit };
        Self {
            shared: Arc::new(Shared {
                io: IoPool::new(),
                admission: Admission::new(fd_limit),
                gate: Gate::new(),
                drained: Latch::new(),
                tempdir: Mutex::new(std::env::temp_dir()),
                names: Mutex::new(TempNames::new()),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The descriptor budget.
    #[must_use]
    pub fn fd_limit(&self) -> usize {
        self.shared.admission.capacity()
    }

    /// Number of handles currently open (equal to the number of
    /// admission tokens held).
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.shared.admission.in_use()
    }

    /// Sets the default directory used to hold temporary files.
    pub fn set_tempdir(&self, tempdir: impl Into<PathBuf>) {
        *self.shared.tempdir.lock() = tempdir.into();
    }

    /// Opens the named file for reading.
    ///
    /// Suspends until the filer has descriptor capacity. Fails with
    /// [`Error::Canceled`] once shutdown has begun.
    #[track_caller]
    pub fn open(&self, path: impl AsRef<Path>) -> impl Future<Output = Result<File>> + Send + 'static {
        let mut options = std::fs::OpenOptions::new();
        options.read(true);
        self.open_with(path, options)
    }

    /// Opens a file with the supplied options.
    ///
    /// The generalized open: suspends until the filer has descriptor
    /// capacity, then applies `options` as given.
    #[track_caller]
    pub fn open_with(
        &self,
        path: impl AsRef<Path>,
        options: std::fs::OpenOptions,
    ) -> impl Future<Output = Result<File>> + Send + 'static {
        let origin = Location::caller();
        let path = path.as_ref().to_path_buf();
        let filer = self.clone();
        async move { filer.open_inner(path, options, origin).await }
    }

    /// Creates a new temporary file in the filer's temp directory.
    ///
    /// The file name is `prefix` + a random hex fragment + `suffix`. The
    /// file is opened read-write create-exclusive and is unlinked when
    /// the handle is closed.
    #[track_caller]
    pub fn temp_file(&self, prefix: &str, suffix: &str) -> impl Future<Output = Result<File>> + Send + 'static {
        let origin = Location::caller();
        let filer = self.clone();
        let prefix = prefix.to_owned();
        let suffix = suffix.to_owned();
        async move { filer.temp_file_inner(None, prefix, suffix, origin).await }
    }

    /// Creates a new temporary file in `dir`.
    #[track_caller]
    pub fn temp_file_in(
        &self,
        dir: impl AsRef<Path>,
        prefix: &str,
        suffix: &str,
    ) -> impl Future<Output = Result<File>> + Send + 'static {
        let origin = Location::caller();
        let filer = self.clone();
        let dir = dir.as_ref().to_path_buf();
        let prefix = prefix.to_owned();
        let suffix = suffix.to_owned();
        async move { filer.temp_file_inner(Some(dir), prefix, suffix, origin).await }
    }

    pub(crate) fn temp_file_with_origin(
        &self,
        origin: Origin,
        prefix: &str,
        suffix: &str,
    ) -> impl Future<Output = Result<File>> + Send + 'static {
        let filer = self.clone();
        let prefix = prefix.to_owned();
        let suffix = suffix.to_owned();
        async move { filer.temp_file_inner(None, prefix, suffix, origin).await }
    }

    /// Creates a [`BufferFile`] whose first `mem_size` bytes live in
    /// memory (default 64 KiB when 0 is given).
    ///
    /// No descriptor is consumed until the contents outgrow the memory
    /// prefix and spill to a temporary file.
    #[track_caller]
    #[must_use]
    pub fn buffer_file(&self, mem_size: usize) -> BufferFile {
        BufferFile::new(self.clone(), mem_size, Location::caller())
    }

    /// Shuts the filer down.
    ///
    /// Refuses new opens immediately, then waits for all registered
    /// handles to be closed. If `cancel` fires first, every remaining
    /// handle is forcibly closed — one record logged per handle, naming
    /// the origin of the call that opened it — and the call returns
    /// [`Error::Canceled`].
    pub async fn shutdown(&self, cancel: impl Future<Output = ()>) -> Result<()> {
        {
            let registry = self.shared.registry.lock();
            self.shared.gate.begin_drain();
            if registry.is_empty() {
                self.shared.drained.open();
            }
        }

        let drained = self.shared.drained.wait();
        pin_mut!(drained, cancel);
        match select(drained, cancel).await {
            Either::Left(((), _)) => return Ok(()),
            Either::Right(((), _)) => {}
        }

        self.shared.gate.force();

        let entries: Vec<HandleEntry> = {
            let mut registry = self.shared.registry.lock();
            registry.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            tracing::warn!(target: "filer", origin = %entry.origin, "waiting for {}", entry.origin);
        }
        for entry in entries {
            let file = entry.file.lock().take();
            drop(file);
            if entry.is_temp {
                let _ = std::fs::remove_file(&entry.path);
            }
            tracing::warn!(target: "filer", origin = %entry.origin, "closing file {}", entry.origin);
        }

        self.shared.drained.open();
        Err(Error::Canceled)
    }

    async fn open_inner(self, path: PathBuf, options: std::fs::OpenOptions, origin: Origin) -> Result<File> {
        let token = self.admit().await?;
        let open_path = path.clone();
        let file = self.shared.io.submit(move || options.open(&open_path)).await?;
        Ok(self.register(file, path, false, origin, token))
    }

    async fn temp_file_inner(self, dir: Option<PathBuf>, prefix: String, suffix: String, origin: Origin) -> Result<File> {
        let token = self.admit().await?;
        let dir = dir.unwrap_or_else(|| self.shared.tempdir.lock().clone());

        let mut last_collision = None;
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let fragment = self.shared.names.lock().next();
            let path = dir.join(format!("{prefix}{fragment}{suffix}"));
            let open_path = path.clone();
            match self.shared.io.submit(move || open_temp(&open_path)).await {
                Ok(file) => return Ok(self.register(file, path, true, origin, token)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_collision = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::from(last_collision.expect("the attempt loop only exhausts on name collisions")))
    }

    async fn admit(&self) -> Result<Token> {
        if self.shared.gate.is_shutdown() {
            return Err(Error::Canceled);
        }
        let acquire = self.shared.admission.acquire();
        let draining = self.shared.gate.draining();
        pin_mut!(acquire, draining);
        match select(acquire, draining).await {
            Either::Left((token, _)) => {
                if self.shared.gate.is_shutdown() {
                    return Err(Error::Canceled);
                }
                Ok(token)
            }
            Either::Right(((), _)) => Err(Error::Canceled),
        }
    }

    fn register(&self, file: std::fs::File, path: PathBuf, is_temp: bool, origin: Origin, token: Token) -> File {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(Mutex::new(Some(file)));
        self.shared.registry.lock().insert(
            id,
            HandleEntry {
                file: Arc::clone(&cell),
                path: path.clone(),
                is_temp,
                origin,
                token,
            },
        );
        File::new(self.clone(), id, cell, path, is_temp)
    }

    pub(crate) fn io(&self) -> &IoPool {
        &self.shared.io
    }

    /// Removes a handle's registry entry. Returns `None` if the handle
    /// was already deregistered (closed, or reaped by forced shutdown).
    pub(crate) fn deregister(&self, id: u64) -> Option<HandleEntry> {
        self.shared.registry.lock().remove(&id)
    }

    /// Called after a handle finishes closing; completes the drain once
    /// the registry empties during shutdown.
    pub(crate) fn finish_close(&self) {
        let empty = self.shared.registry.lock().is_empty();
        if empty && self.shared.gate.is_shutdown() {
            self.shared.drained.open();
        }
    }
}

impl core::fmt::Debug for Filer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Filer")
            .field("fd_limit", &self.fd_limit())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

fn open_temp(path: &Path) -> io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn default_fd_limit() -> usize {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes to the provided struct and returns 0 on
    // success; the struct is plain-old-data owned by this frame.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &raw mut limit) };
    if rc == 0 && limit.rlim_cur > 0 && limit.rlim_cur != libc::RLIM_INFINITY {
        let soft = usize::try_from(limit.rlim_cur).unwrap_or(usize::MAX);
        return (soft - soft / 10).max(1);
    }
    90
}

#[cfg(not(unix))]
fn default_fd_limit() -> usize {
    90
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Filer: Send, Sync, Clone);
    }

    #[test]
    fn default_limit_is_positive() {
        assert!(default_fd_limit() >= 1);
    }

    #[tokio::test]
    async fn open_after_drain_is_canceled() {
        let filer = Filer::new(4);
        filer.shutdown(std::future::pending()).await.unwrap();
        match filer.temp_file("t-", "").await {
            Err(Error::Canceled) => {}
            other => panic!("expected Canceled, got {other:?}"),
        }
    }
}
