// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use bytes::Bytes;
use filer::BufferFile;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;

/// A positional reader over a section of a [`BufferFile`].
///
/// Section readers share the underlying storage but own their offset,
/// so any number of them can read the same buffer concurrently. Reads
/// never disturb the buffer's own cursor.
#[derive(Debug)]
pub struct SectionReader<'a> {
    buffer: &'a BufferFile,
    pos: u64,
    end: u64,
}

impl<'a> SectionReader<'a> {
    /// Creates a reader over `buffer[start..end]`.
    #[must_use]
    pub fn new(buffer: &'a BufferFile, start: u64, end: u64) -> Self {
        Self {
            buffer,
            pos: start,
            end,
        }
    }

    /// Bytes left in the section.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.pos)
    }

    /// Reads from the section into `buf`, returning `Ok(0)` at the end
    /// of the section.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from((self.end - self.pos).min(buf.len() as u64)).expect("bounded by buf.len()");
        let n = self.buffer.read_at(&mut buf[..want], self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Reads the rest of the section.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut contents = Vec::with_capacity(usize::try_from(self.remaining()).unwrap_or(0));
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(contents);
            }
            contents.extend_from_slice(&chunk[..n]);
        }
    }
}

/// The body of a fetched [`Response`](crate::Response).
///
/// Each body is an independent view over the fetcher's shared buffer,
/// from offset 0 to the length buffered at completion. Closing (or
/// dropping) the body releases the caller's reference on the fetcher;
/// when the last reference goes, the buffer is closed and the fetcher
/// leaves the registry.
///
/// [`close`](Body::close) reports whether the release was orderly —
/// after a forced shutdown it returns [`Error::Canceled`]. Dropping an
/// unclosed body performs the same release silently.
pub struct Body {
    client: Client,
    fetcher: Option<Arc<Fetcher>>,
    pos: u64,
    end: u64,
}

impl Body {
    pub(crate) fn new(client: Client, fetcher: Arc<Fetcher>, end: u64) -> Self {
        Self {
            client,
            fetcher: Some(fetcher),
            pos: 0,
            end,
        }
    }

    /// Total body length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end
    }

    /// True for a zero-length body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Reads from the body into `buf`, returning `Ok(0)` at the end.
    ///
    /// Fails with [`Error::Canceled`] if the fetcher was reaped by a
    /// forced shutdown.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(fetcher) = &self.fetcher else {
            return Err(Error::File(filer::Error::AlreadyClosed));
        };
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let buffer = fetcher.state().lock().buffer.clone();
        let Some(buffer) = buffer else {
            return Err(Error::Canceled);
        };

        let want = usize::try_from((self.end - self.pos).min(buf.len() as u64)).expect("bounded by buf.len()");
        let n = buffer.read_at(&mut buf[..want], self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Reads the remainder of the body.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut contents = Vec::with_capacity(usize::try_from(self.end.saturating_sub(self.pos)).unwrap_or(0));
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(Bytes::from(contents));
            }
            contents.extend_from_slice(&chunk[..n]);
        }
    }

    /// Releases this body's reference on the fetcher.
    ///
    /// Returns [`Error::Canceled`] if the fetcher was already reaped by
    /// a forced shutdown. A second close fails with
    /// [`filer::Error::AlreadyClosed`].
    pub fn close(&mut self) -> Result<()> {
        let Some(fetcher) = self.fetcher.take() else {
            return Err(Error::File(filer::Error::AlreadyClosed));
        };
        self.client.release_body(&fetcher)
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Some(fetcher) = self.fetcher.take() {
            let _ = self.client.release_body(&fetcher);
        }
    }
}

impl core::fmt::Debug for Body {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Body")
            .field("pos", &self.pos)
            .field("end", &self.end)
            .field("closed", &self.fetcher.is_none())
            .finish()
    }
}
