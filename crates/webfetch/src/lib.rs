// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A caching, single-flight HTTP client.
//!
//! [`Client`] wraps a pluggable HTTP [`Transport`] with three behaviors:
//!
//! 1. **Single-flight coalescing.** Concurrent fetches of the same URL
//!    share one underlying request. The first caller's fetcher does the
//!    work; every caller receives an independent reader view over the
//!    same buffered body. A fetcher lives until the last outstanding
//!    body is closed, so even a late-arriving caller coalesces onto it.
//!
//! 2. **Pluggable caching.** With a [`CacheStore`] configured, each
//!    fetcher consults the cache before touching the transport and
//!    stores successful `200` bodies back into it. Non-`200` responses
//!    are never cached.
//!
//! 3. **Spillable buffering.** Bodies stream into a
//!    [`filer::BufferFile`]: small responses stay in memory and hold no
//!    file descriptor; large ones spill to a temporary file accounted
//!    against the filer's descriptor budget.
//!
//! Shutdown is two-phase: [`Client::shutdown`] refuses new work and
//! waits for outstanding bodies; when its cancel future fires, in-flight
//! HTTP is aborted and leftovers are force-closed after a short grace
//! window.
//!
//! The client is runtime-agnostic. Fetch tasks are launched through the
//! [`Spawner`] seam; the `tokio` feature (default) provides
//! [`TokioSpawner`], and the `reqwest` feature provides a ready-made
//! [`ReqwestTransport`].
//!
//! # Quick start
//!
//! ```no_run
//! use webfetch::{Client, Request, Transport};
//!
//! # async fn example(transport: impl Transport) -> webfetch::Result<()> {
//! let filer = filer::Filer::new(0);
//! let client = Client::builder(transport, filer).build();
//!
//! let request = || {
//!     Request::builder()
//!         .uri("https://example.com/data")
//!         .body(())
//!         .expect("valid request")
//! };
//!
//! // Identical concurrent fetches share one HTTP request.
//! let (a, b) = futures::join!(client.execute(request()), client.execute(request()));
//! let (a, b) = (a?.bytes().await?, b?.bytes().await?);
//! assert_eq!(a, b);
//!
//! client.shutdown(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

pub use crate::body::{Body, SectionReader};
pub use crate::cache::CacheStore;
pub use crate::client::{Client, ClientBuilder};
pub use crate::error::{BoxError, Error, Result};
pub use crate::log::{FetchEvent, FetchRecord, LogSink, TracingSink};
pub use crate::response::Response;
#[cfg(feature = "reqwest")]
pub use crate::transport::ReqwestTransport;
pub use crate::transport::{BodyStream, FetchResponse, Request, Transport};
#[cfg(feature = "tokio")]
pub use crate::spawner::TokioSpawner;
pub use crate::spawner::Spawner;

mod body;
mod cache;
mod client;
mod error;
mod fetcher;
mod log;
mod response;
mod spawner;
mod transport;
