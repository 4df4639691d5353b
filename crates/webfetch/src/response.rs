// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::body::Body;
use crate::error::Result;
use crate::transport::Request;

/// A fetched response.
///
/// For a response served by the transport, the status and headers are a
/// shallow copy of what the transport returned; for one served from the
/// cache they are a synthesized minimal response (status 200, empty
/// headers). The body is always an independent view over the shared
/// buffer.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    request: Request,
    body: Body,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, request: Request, body: Body) -> Self {
        Self {
            status,
            headers,
            request,
            body,
        }
    }

    /// The HTTP status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request this response answers.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response body.
    #[must_use]
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Consumes the response, returning its body.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Reads the full body and closes it.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let contents = self.body.read_to_end().await?;
        self.body.close()?;
        Ok(contents)
    }
}
