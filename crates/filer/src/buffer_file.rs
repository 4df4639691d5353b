// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, SeekFrom};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::file::File;
use crate::filer::{Filer, Origin};

pub(crate) const DEFAULT_MEM_SIZE: usize = 1 << 16;

/// The lifecycle of a [`BufferFile`].
///
/// Once a spill-file error is recorded it is sticky: every subsequent
/// operation except close returns the same error.
#[derive(Debug)]
enum State {
    Ok,
    Errored(Error),
    Closed,
}

/// A seekable read/write byte container whose first `mem_size` bytes are
/// stored in memory.
///
/// In the typical case where the contents fit in the memory prefix, a
/// `BufferFile` never touches the disk and never holds a file
/// descriptor. Contents beyond the prefix spill transparently to a
/// [`Filer`]-owned temporary file, consuming one admission token for the
/// lifetime of the buffer.
///
/// The spill file's cursor always mirrors `position - mem_size`
/// (clamped to zero), so every read and write is a single syscall rather
/// than a seek-then-operate pair.
///
/// Created by [`Filer::buffer_file`]. [`close`](BufferFile::close)
/// releases the spill file, which unlinks it and returns its token.
///
/// # Example
///
/// ```no_run
/// # futures::executor::block_on(async {
/// let filer = filer::Filer::new(16);
/// let mut buffer = filer.buffer_file(0);
///
/// buffer.write(b"small payloads stay in memory").await?;
/// assert!(!buffer.spilled());
///
/// buffer.seek(std::io::SeekFrom::Start(0)).await?;
/// let mut contents = vec![0; buffer.len() as usize];
/// buffer.read(&mut contents).await?;
/// buffer.close().await?;
/// # Ok::<(), filer::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct BufferFile {
    filer: Filer,
    origin: Origin,
    state: State,
    mem_max: usize,
    mem: Vec<u8>,
    spill: Option<File>,
    /// Length of the spill file.
    flen: u64,
    /// Logical position; the spill file's cursor is kept in sync.
    off: u64,
}

impl BufferFile {
    pub(crate) fn new(filer: Filer, mem_size: usize, origin: Origin) -> Self {
        let mem_max = if mem_size == 0 { DEFAULT_MEM_SIZE } else { mem_size };
        Self {
            filer,
            origin,
            state: State::Ok,
            mem_max,
            mem: Vec::new(),
            spill: None,
            flen: 0,
            off: 0,
        }
    }

    /// Total logical length: the memory prefix plus the spill file.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.mem.len() as u64 + self.flen
    }

    /// True if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current logical position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.off
    }

    /// True if the contents have outgrown the memory prefix and a spill
    /// file (holding one admission token) exists.
    #[must_use]
    pub fn spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Writes `data` at the current position, growing the memory prefix
    /// (zero-filled) as needed and spilling anything beyond it to disk.
    ///
    /// Returns the number of bytes written. Spill-file errors are sticky.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_state()?;
        let end = self.off + data.len() as u64;
        if end > self.mem.len() as u64 && self.mem.len() < self.mem_max {
            let grow_to = usize::try_from(end.min(self.mem_max as u64)).expect("bounded by mem_max");
            self.mem.resize(grow_to, 0);
        }
        if end > self.mem_max as u64 {
            self.ensure_spill().await?;
        }

        let mut written = 0;
        if self.off < self.mem.len() as u64 {
            let start = usize::try_from(self.off).expect("bounded by mem_max");
            let n = (self.mem.len() - start).min(data.len());
            self.mem[start..start + n].copy_from_slice(&data[..n]);
            self.off += n as u64;
            written = n;
        }
        if written == data.len() {
            return Ok(written);
        }

        // The remainder lands past the memory prefix; the spill file is
        // already positioned at `off - mem_max`.
        let spill = self
            .spill
            .as_mut()
            .expect("spill file exists for writes past the memory cap");
        match spill.write(Bytes::copy_from_slice(&data[written..])).await {
            Ok(n) => {
                self.off += n as u64;
                written += n;
                let fpos = self.off - self.mem.len() as u64;
                if fpos > self.flen {
                    self.flen = fpos;
                }
                Ok(written)
            }
            Err(e) => Err(self.sticky(e)),
        }
    }

    /// Reads from the current position into `buf`.
    ///
    /// A single call covers at most one region: the memory prefix or the
    /// spill file, whichever the position falls in. Returns `Ok(0)` at
    /// end of file; end of file is never sticky.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_state()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.off < self.mem.len() as u64 {
            let start = usize::try_from(self.off).expect("bounded by mem_max");
            let n = (self.mem.len() - start).min(buf.len());
            buf[..n].copy_from_slice(&self.mem[start..start + n]);
            self.off += n as u64;
            return Ok(n);
        }
        let Some(spill) = self.spill.as_mut() else {
            return Ok(0);
        };
        match spill.read(buf.len()).await {
            Ok(data) => {
                buf[..data.len()].copy_from_slice(&data);
                self.off += data.len() as u64;
                Ok(data.len())
            }
            Err(e) => Err(self.sticky(e)),
        }
    }

    /// Reads at `offset` without moving the position or disturbing the
    /// spill file's cursor.
    ///
    /// Covers at most one region per call, like [`read`](BufferFile::read).
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_state()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if offset < self.mem.len() as u64 {
            let start = usize::try_from(offset).expect("bounded by mem_max");
            let n = (self.mem.len() - start).min(buf.len());
            buf[..n].copy_from_slice(&self.mem[start..start + n]);
            return Ok(n);
        }
        let Some(spill) = self.spill.as_ref() else {
            return Ok(0);
        };
        let data = spill.read_at(buf.len(), offset - self.mem.len() as u64).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Moves the logical position.
    ///
    /// The `End` anchor is the total logical length. Seeking before the
    /// start is an error, but not a sticky one. Seeking past the memory
    /// cap materialises the spill file so its cursor can be positioned.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_state()?;
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.off) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len()) + i128::from(delta),
        };
        let Ok(target) = u64::try_from(target) else {
            return Err(Error::from(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek before start of buffer ({target})"),
            )));
        };

        if target > self.mem_max as u64 {
            self.ensure_spill().await?;
        }
        if let Some(spill) = self.spill.as_mut() {
            let spill_pos = target.saturating_sub(self.mem_max as u64);
            if let Err(e) = spill.seek(SeekFrom::Start(spill_pos)).await {
                return Err(self.sticky(e));
            }
        }
        self.off = target;
        Ok(target)
    }

    /// Seeks back to the start.
    pub async fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0)).await.map(|_| ())
    }

    /// Closes the buffer, releasing the spill file (which unlinks it and
    /// returns its admission token).
    ///
    /// After a successful close every operation fails with
    /// [`Error::AlreadyClosed`]. Closing an already-closed buffer is a
    /// no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut spill) = self.spill.take() {
            if let Err(e) = spill.close().await {
                return Err(self.sticky(e));
            }
        }
        if matches!(self.state, State::Ok) {
            self.state = State::Closed;
        }
        Ok(())
    }

    async fn ensure_spill(&mut self) -> Result<()> {
        if self.spill.is_some() {
            return Ok(());
        }
        match self
            .filer
            .temp_file_with_origin(self.origin, "bufferfile-", "")
            .await
        {
            Ok(file) => {
                self.spill = Some(file);
                Ok(())
            }
            Err(e) => Err(self.sticky(e)),
        }
    }

    fn check_state(&self) -> Result<()> {
        match &self.state {
            State::Ok => Ok(()),
            State::Errored(e) => Err(e.clone()),
            State::Closed => Err(Error::AlreadyClosed),
        }
    }

    fn sticky(&mut self, error: Error) -> Error {
        self.state = State::Errored(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checks the structural invariants that must hold after every
    /// externally visible operation.
    async fn assert_invariants(bf: &mut BufferFile) {
        assert!(bf.mem.len() <= bf.mem_max, "memory prefix exceeds its cap");
        if bf.mem.len() < bf.mem_max {
            assert_eq!(bf.flen, 0, "partial memory prefix with a non-empty spill file");
        }
        if let Some(spill) = bf.spill.as_mut() {
            let pos = spill.stream_position().await.unwrap();
            assert_eq!(
                pos,
                bf.off.saturating_sub(bf.mem_max as u64),
                "spill cursor out of sync with the logical position"
            );
            let disk_len = spill.metadata().await.unwrap().len();
            assert_eq!(disk_len, bf.flen, "tracked spill length out of sync with the file");
        }
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(BufferFile: Send, Sync);
    }

    #[tokio::test]
    async fn small_write_stays_in_memory() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(0);

        assert_eq!(bf.write(b"hello").await.unwrap(), 5);
        assert_eq!(bf.len(), 5);
        assert!(!bf.spilled());
        assert_eq!(filer.open_handles(), 0);
        assert_invariants(&mut bf).await;

        bf.rewind().await.unwrap();
        let mut out = [0u8; 5];
        assert_eq!(bf.read(&mut out).await.unwrap(), 5);
        assert_eq!(&out, b"hello");

        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_read_is_eof() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(0);
        let mut out = [0u8; 3];
        assert_eq!(bf.read(&mut out).await.unwrap(), 0);
        assert_eq!(bf.read_at(&mut out, 0).await.unwrap(), 0);
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn negative_seek_is_an_error_but_not_sticky() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(0);
        bf.write(b"abc").await.unwrap();

        match bf.seek(SeekFrom::Current(-10)).await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
        // Still usable.
        bf.rewind().await.unwrap();
        let mut out = [0u8; 3];
        assert_eq!(bf.read(&mut out).await.unwrap(), 3);
        assert_eq!(&out, b"abc");
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn writes_past_the_cap_spill_to_disk() {
        let filer = Filer::new(2);
        let mut bf = filer.buffer_file(8);

        let payload: Vec<u8> = (0..64u8).collect();
        assert_eq!(bf.write(&payload).await.unwrap(), 64);
        assert!(bf.spilled());
        assert_eq!(bf.len(), 64);
        assert_eq!(filer.open_handles(), 1);
        assert_invariants(&mut bf).await;

        bf.rewind().await.unwrap();
        assert_invariants(&mut bf).await;

        let mut out = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = bf.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            assert_invariants(&mut bf).await;
        }
        assert_eq!(out, payload);

        bf.close().await.unwrap();
        assert_eq!(filer.open_handles(), 0);
    }

    #[tokio::test]
    async fn boundary_write_exactly_at_cap_does_not_spill() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(8);
        assert_eq!(bf.write(&[7u8; 8]).await.unwrap(), 8);
        assert!(!bf.spilled());
        assert_invariants(&mut bf).await;

        // One more byte crosses the cap.
        assert_eq!(bf.write(&[9u8]).await.unwrap(), 1);
        assert!(bf.spilled());
        assert_eq!(bf.len(), 9);
        assert_invariants(&mut bf).await;
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn sparse_seek_past_end_zero_fills() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(4);
        bf.write(b"ab").await.unwrap();

        bf.seek(SeekFrom::Start(10)).await.unwrap();
        assert_invariants(&mut bf).await;
        bf.write(b"z").await.unwrap();
        assert_eq!(bf.len(), 11);
        assert_invariants(&mut bf).await;

        bf.rewind().await.unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 4];
        loop {
            let n = bf.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, b"ab\0\0\0\0\0\0\0\0z");
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn read_at_does_not_disturb_the_cursor() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(4);
        bf.write(b"0123456789").await.unwrap();
        bf.seek(SeekFrom::Start(6)).await.unwrap();

        let mut out = [0u8; 2];
        assert_eq!(bf.read_at(&mut out, 0).await.unwrap(), 2);
        assert_eq!(&out, b"01");
        assert_eq!(bf.read_at(&mut out, 8).await.unwrap(), 2);
        assert_eq!(&out, b"89");

        assert_eq!(bf.position(), 6);
        assert_invariants(&mut bf).await;
        let mut rest = [0u8; 4];
        assert_eq!(bf.read(&mut rest).await.unwrap(), 4);
        assert_eq!(&rest, b"6789");
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let filer = Filer::new(1);
        let mut bf = filer.buffer_file(0);
        bf.write(b"x").await.unwrap();
        bf.close().await.unwrap();

        match bf.write(b"y").await {
            Err(Error::AlreadyClosed) => {}
            other => panic!("expected AlreadyClosed, got {other:?}"),
        }
        let mut out = [0u8; 1];
        match bf.read(&mut out).await {
            Err(Error::AlreadyClosed) => {}
            other => panic!("expected AlreadyClosed, got {other:?}"),
        }
        // A second close is a no-op.
        bf.close().await.unwrap();
    }

    #[tokio::test]
    async fn spill_failure_is_sticky() {
        let filer = Filer::new(4);
        filer.set_tempdir("/nonexistent-tempdir-for-bufferfile-tests");
        let mut bf = filer.buffer_file(2);

        let first = bf.write(&[0u8; 16]).await.unwrap_err();
        let second = bf.write(b"x").await.unwrap_err();
        assert_eq!(first.to_string(), second.to_string());

        bf.close().await.unwrap();
    }
}
