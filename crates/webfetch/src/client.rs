// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use filer::{BufferFile, Filer};
use futures::StreamExt;
use futures::future::{Either, select};
use futures::pin_mut;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use quiesce::{Gate, Latch};

use crate::body::{Body, SectionReader};
use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, ResponseMeta};
use crate::log::{FetchRecord, LogSink};
use crate::response::Response;
use crate::spawner::Spawner;
use crate::transport::{Request, Transport};

/// How long a forced shutdown waits for cancellation to quiesce the
/// remaining fetchers before reaping them.
const FORCED_GRACE: Duration = Duration::from_millis(10);

struct ClientInner {
    transport: Arc<dyn Transport>,
    filer: Filer,
    cache: Option<Arc<dyn CacheStore>>,
    log: Option<Arc<dyn LogSink>>,
    spawner: Arc<dyn Spawner>,
    buffer_mem: usize,
    gate: Gate,
    drained: Latch,
    registry: Mutex<HashMap<String, Arc<Fetcher>>>,
}

/// A caching, single-flight HTTP client.
///
/// Concurrent [`execute`](Client::execute) calls for the same URL are
/// coalesced onto one fetcher: the transport is invoked exactly once,
/// the body is buffered once (in memory, spilling to disk past the
/// buffer's cap), and every caller receives an independent reader view
/// over the shared bytes.
///
/// When a cache is configured, each fetcher consults it before touching
/// the transport and stores successful `200` bodies back after.
///
/// Cloning a `Client` is cheap; clones share the fetcher registry and
/// shutdown state.
///
/// # Example
///
/// ```no_run
/// use webfetch::{Client, Request};
///
/// # async fn example(transport: impl webfetch::Transport) -> webfetch::Result<()> {
/// let filer = filer::Filer::new(0);
/// let client = Client::builder(transport, filer).build();
///
/// let request = Request::builder()
///     .uri("https://example.com/data")
///     .body(())
///     .expect("valid request");
/// let response = client.execute(request).await?;
/// let bytes = response.bytes().await?;
/// # let _ = bytes;
///
/// client.shutdown(std::future::pending()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts building a client over `transport`, buffering bodies
    /// through `filer`.
    #[must_use]
    pub fn builder(transport: impl Transport, filer: Filer) -> ClientBuilder {
        ClientBuilder {
            transport: Arc::new(transport),
            filer,
            cache: None,
            log: None,
            spawner: None,
            buffer_mem: 0,
        }
    }

    /// Executes `request`, coalescing with any in-flight fetch of the
    /// same URL.
    ///
    /// The coalescing key is the exact stringified request URI; query
    /// parameter order is not normalised, so callers that rely on
    /// canonical-form matching must normalise before calling.
    ///
    /// The returned [`Response`] owns a body view that must be closed
    /// (or dropped); the fetcher and its buffer live until every
    /// outstanding body is released.
    ///
    /// Fails with [`Error::Canceled`] once shutdown has begun. A
    /// fetcher's terminal error is delivered identically to every
    /// coalesced caller.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        if self.inner.gate.is_shutdown() {
            return Err(Error::Canceled);
        }
        let url = request.uri().to_string();

        let fetcher = {
            let mut registry = self.inner.registry.lock();
            if self.inner.gate.is_shutdown() {
                return Err(Error::Canceled);
            }
            if let Some(fetcher) = registry.get(&url) {
                fetcher.state().lock().reqs += 1;
                Arc::clone(fetcher)
            } else {
                let fetcher = Arc::new(Fetcher::new(url.clone()));
                registry.insert(url, Arc::clone(&fetcher));
                let buffer = self.inner.filer.buffer_file(self.inner.buffer_mem);
                let task = run_fetch(self.clone(), Arc::clone(&fetcher), clone_request(&request), buffer);
                self.inner.spawner.spawn(Box::pin(task));
                fetcher
            }
        };

        fetcher.done().wait().await;
        self.build_response(&fetcher, request)
    }

    /// Shuts the client down.
    ///
    /// Refuses new fetches immediately, then waits for every
    /// outstanding response body to be closed. If `cancel` fires first,
    /// the root cancellation propagates to all in-flight fetches, a
    /// short grace window lets them quiesce, any leftover fetchers are
    /// force-closed (one record logged per fetcher), and the call
    /// returns [`Error::Canceled`].
    pub async fn shutdown(&self, cancel: impl Future<Output = ()>) -> Result<()> {
        {
            let registry = self.inner.registry.lock();
            self.inner.gate.begin_drain();
            if registry.is_empty() {
                self.inner.drained.open();
            }
        }

        {
            let drained = self.inner.drained.wait();
            pin_mut!(drained, cancel);
            if let Either::Left(_) = select(drained, cancel).await {
                self.inner.gate.force();
                return Ok(());
            }
        }

        // Abort in-flight HTTP, then give cancellation the briefest of
        // moments to propagate.
        self.inner.gate.force();
        if !self.inner.drained.is_open() {
            let drained = self.inner.drained.wait();
            let grace = quiesce::delay(FORCED_GRACE);
            pin_mut!(drained, grace);
            select(drained, grace).await;
        }

        if !self.inner.drained.is_open() {
            self.reap_leftovers();
        }

        self.inner.drained.wait().await;
        Err(Error::Canceled)
    }

    /// Force-closes every fetcher still in the registry.
    fn reap_leftovers(&self) {
        let leftovers: Vec<Arc<Fetcher>> = {
            let mut registry = self.inner.registry.lock();
            registry.drain().map(|(_, fetcher)| fetcher).collect()
        };
        let now = SystemTime::now();
        for fetcher in leftovers {
            if let Some(sink) = &self.inner.log {
                sink.emit(&FetchRecord::force_shutdown(fetcher.url(), now));
            }
            let released = {
                let mut state = fetcher.state().lock();
                state.reqs = 0;
                if state.error.is_none() {
                    state.error = Some(Error::Canceled);
                }
                state.buffer.take()
            };
            drop(released);
            fetcher.done().open();
        }
        self.inner.drained.open();
    }

    fn build_response(&self, fetcher: &Arc<Fetcher>, request: Request) -> Result<Response> {
        let (meta, len) = {
            let state = fetcher.state().lock();
            if let Some(error) = &state.error {
                let error = error.clone();
                drop(state);
                let _ = self.release_body(fetcher);
                return Err(error);
            }
            let len = state.buffer.as_ref().map_or(0, |buffer| buffer.len());
            (state.meta.clone(), len)
        };

        // A cache hit carries no transport metadata; synthesize a
        // minimal response around the buffered bytes.
        let (status, headers) = match meta {
            Some(meta) => (meta.status, meta.headers),
            None => (StatusCode::OK, HeaderMap::new()),
        };

        let body = Body::new(self.clone(), Arc::clone(fetcher), len);
        Ok(Response::new(status, headers, request, body))
    }

    /// Number of fetchers currently registered: unique URLs with at
    /// least one outstanding body (or an in-flight fetch).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Releases one response-body reference; the single decrementer of
    /// a fetcher's waiter count.
    pub(crate) fn release_body(&self, fetcher: &Fetcher) -> Result<()> {
        let released;
        {
            let mut registry = self.inner.registry.lock();
            let mut state = fetcher.state().lock();
            if state.reqs == 0 {
                // The fetcher was reaped by a forced shutdown.
                return Err(Error::Canceled);
            }
            state.reqs -= 1;
            if state.reqs > 0 {
                return Ok(());
            }
            released = state.buffer.take();
            drop(state);
            registry.remove(fetcher.url());
            if registry.is_empty() && self.inner.gate.is_shutdown() {
                self.inner.drained.open();
            }
        }
        // Dropping the last buffer reference releases its spill file;
        // keep that outside the locks.
        drop(released);
        Ok(())
    }
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("fetchers", &self.inner.registry.lock().len())
            .field("phase", &self.inner.gate.phase())
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    filer: Filer,
    cache: Option<Arc<dyn CacheStore>>,
    log: Option<Arc<dyn LogSink>>,
    spawner: Option<Arc<dyn Spawner>>,
    buffer_mem: usize,
}

impl ClientBuilder {
    /// Consults `cache` before each fetch and stores successful `200`
    /// bodies back into it.
    #[must_use]
    pub fn cache(mut self, cache: impl CacheStore) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Delivers one structured record per fetch attempt (and per
    /// force-closed fetcher) to `sink`.
    #[must_use]
    pub fn log_sink(mut self, sink: impl LogSink) -> Self {
        self.log = Some(Arc::new(sink));
        self
    }

    /// Spawns fetch tasks with `spawner` instead of the default.
    #[must_use]
    pub fn spawner(mut self, spawner: impl Spawner) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Sets the in-memory cap of each body buffer (0 means the
    /// [`BufferFile`] default of 64 KiB). Bodies beyond the cap spill
    /// to disk and hold one descriptor until released.
    #[must_use]
    pub fn buffer_memory(mut self, mem_size: usize) -> Self {
        self.buffer_mem = mem_size;
        self
    }

    /// Builds the client.
    ///
    /// # Panics
    ///
    /// Panics if no spawner was configured and the `tokio` feature is
    /// disabled.
    #[must_use]
    pub fn build(self) -> Client {
        let spawner = self.spawner.unwrap_or_else(default_spawner);
        Client {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                filer: self.filer,
                cache: self.cache,
                log: self.log,
                spawner,
                buffer_mem: self.buffer_mem,
                gate: Gate::new(),
                drained: Latch::new(),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl core::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("cache", &self.cache.is_some())
            .field("log", &self.log.is_some())
            .field("buffer_mem", &self.buffer_mem)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tokio")]
fn default_spawner() -> Arc<dyn Spawner> {
    Arc::new(crate::spawner::TokioSpawner)
}

#[cfg(not(feature = "tokio"))]
fn default_spawner() -> Arc<dyn Spawner> {
    panic!("no spawner configured; enable the `tokio` feature or supply one with ClientBuilder::spawner")
}

/// The fetch task: runs once per fetcher, then releases every waiter.
async fn run_fetch(client: Client, fetcher: Arc<Fetcher>, request: Request, mut buffer: BufferFile) {
    let inner = &client.inner;
    let url = fetcher.url().to_owned();

    // First see if the result is already cached.
    if let Some(cache) = &inner.cache {
        match until_forced(&inner.gate, cache.get(&url, &mut buffer)).await {
            None => return fetcher.finish(buffer, None, Some(Error::Canceled)),
            Some(Ok(true)) => return fetcher.finish(buffer, None, None),
            Some(Ok(false)) => {}
            Some(Err(e)) => return fetcher.finish(buffer, None, Some(Error::cache(e))),
        }
    }

    // Not cached; fetch from the web, streaming the body into the
    // buffer. The transport call and every chunk race the root
    // cancellation handle.
    let when = SystemTime::now();
    let started = Instant::now();
    let outcome = until_forced(&inner.gate, inner.transport.fetch(request)).await;
    let duration = started.elapsed();

    let mut meta = None;
    let mut error = None;
    match outcome {
        None => error = Some(Error::Canceled),
        Some(Err(e)) => error = Some(Error::transport(e)),
        Some(Ok(response)) => {
            meta = Some(ResponseMeta {
                status: response.status,
                headers: response.headers,
            });
            let mut chunks = response.body;
            loop {
                match until_forced(&inner.gate, chunks.next()).await {
                    None => {
                        error = Some(Error::Canceled);
                        break;
                    }
                    Some(None) => break,
                    Some(Some(Err(e))) => {
                        error = Some(Error::transport(e));
                        break;
                    }
                    Some(Some(Ok(chunk))) => {
                        if let Err(e) = buffer.write(&chunk).await {
                            error = Some(Error::File(e));
                            break;
                        }
                    }
                }
            }
            // Dropping the stream closes the body, releasing the
            // connection even when the copy stopped early.
            drop(chunks);
        }
    }

    if let Some(sink) = &inner.log {
        let status = meta.as_ref().map_or(0, |meta| meta.status.as_u16());
        sink.emit(&FetchRecord::fetch(&url, when, duration, status, buffer.len()));
    }

    // Only successful 200 responses are written back to the cache; a
    // store failure becomes the terminal error so waiters learn the
    // cache is unhealthy.
    if error.is_none() && meta.as_ref().is_some_and(|meta| meta.status == StatusCode::OK) {
        if let Some(cache) = &inner.cache {
            let len = buffer.len();
            let source = SectionReader::new(&buffer, 0, len);
            match until_forced(&inner.gate, cache.put(&url, source, len)).await {
                None => error = Some(Error::Canceled),
                Some(Err(e)) => error = Some(Error::cache(e)),
                Some(Ok(())) => {}
            }
        }
    }

    fetcher.finish(buffer, meta, error);
}

/// Races `work` against the root cancellation handle. `None` means the
/// work future was dropped because shutdown was forced.
async fn until_forced<T>(gate: &Gate, work: impl Future<Output = T>) -> Option<T> {
    let forced = gate.forced();
    pin_mut!(work, forced);
    match select(work, forced).await {
        Either::Left((value, _)) => Some(value),
        Either::Right(((), _)) => None,
    }
}

/// Rebuilds a request for the fetch task (method, URI, version, and
/// headers; extensions are not carried over).
fn clone_request(request: &Request) -> Request {
    let mut cloned = http::Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .version(request.version())
        .body(())
        .expect("rebuilding a valid request cannot fail");
    *cloned.headers_mut() = request.headers().clone();
    cloned
}
