// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::error::BoxError;

/// The request type accepted by [`Client::execute`](crate::Client::execute).
///
/// Requests carry no body; this client fetches and streams responses.
pub type Request = http::Request<()>;

/// A streaming response body: a sequence of byte chunks.
///
/// Dropping the stream before exhaustion is meaningful — it releases the
/// underlying connection and aborts any remaining transfer.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// A response produced by a [`Transport`]: status, headers, and a
/// streamable body.
pub struct FetchResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body chunks.
    pub body: BodyStream,
}

impl FetchResponse {
    /// Creates a response from any chunk stream.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            status,
            headers,
            body: body.boxed(),
        }
    }
}

impl core::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The underlying HTTP transport.
///
/// Implementations issue the request and return the response headers
/// together with a streamable body. Cancellation is by drop: the client
/// drops the returned future (or the body stream) when a forced shutdown
/// aborts the fetch, and the transport must release the connection in
/// response.
pub trait Transport: Send + Sync + 'static {
    /// Issues `request`, resolving to the response head and body stream.
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<FetchResponse, BoxError>>;
}

/// A [`Transport`] backed by a [`reqwest::Client`].
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestTransport {
    /// Wraps an existing client, keeping its connection pool and TLS
    /// configuration.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<FetchResponse, BoxError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let url = reqwest::Url::parse(&request.uri().to_string())?;
            let mut outgoing = client.request(request.method().clone(), url);
            for (name, value) in request.headers() {
                outgoing = outgoing.header(name, value);
            }

            let response = outgoing.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
            Ok(FetchResponse::new(status, headers, body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(FetchResponse: Send);
    }

    #[tokio::test]
    async fn response_streams_its_chunks() {
        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let mut response = FetchResponse::new(StatusCode::OK, HeaderMap::new(), futures::stream::iter(chunks));

        let mut collected = Vec::new();
        while let Some(chunk) = response.body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abcd");
    }
}
