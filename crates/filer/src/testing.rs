// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Differential test support.
//!
//! [`FileExerciser`] drives an identical random sequence of read, write,
//! and seek events against a [`BufferFile`] and a reference [`File`],
//! asserting that every result matches and that the final contents are
//! identical. Because the reference is a plain OS file, any divergence
//! points at the buffer's spill arithmetic.

use std::io::SeekFrom;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::{BufferFile, File};

/// Drives a [`BufferFile`] and a reference [`File`] through the same
/// random event sequence and asserts they behave identically.
///
/// ```no_run
/// # futures::executor::block_on(async {
/// use filer::testing::FileExerciser;
///
/// let filer = filer::Filer::new(8);
/// let mut buffer = filer.buffer_file(1024);
/// let mut reference = filer.temp_file("reference-", "").await?;
///
/// FileExerciser::new(107).run(&mut buffer, &mut reference).await;
///
/// buffer.close().await?;
/// reference.close().await?;
/// # Ok::<(), filer::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct FileExerciser {
    rng: StdRng,
    events: usize,
    max_size: usize,
}

impl FileExerciser {
    /// Creates an exerciser with a deterministic seed, 256 events, and
    /// 8 KiB maximum event size.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            events: 256,
            max_size: 8192,
        }
    }

    /// Sets the number of events to run.
    #[must_use]
    pub fn events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    /// Sets the maximum read/write/seek size per event.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Runs the event sequence, panicking on the first divergence.
    pub async fn run(mut self, primary: &mut BufferFile, reference: &mut File) {
        for event in 0..self.events {
            match self.rng.gen_range(0..3) {
                0 => self.read_event(event, primary, reference).await,
                1 => self.write_event(event, primary, reference).await,
                _ => self.seek_event(event, primary, reference).await,
            }
        }

        let primary_contents = read_all_buffer(primary).await;
        let reference_contents = read_all_file(reference).await;
        assert_eq!(
            primary_contents.len(),
            reference_contents.len(),
            "final contents diverge in length"
        );
        assert!(primary_contents == reference_contents, "final contents diverge");
    }

    async fn read_event(&mut self, event: usize, primary: &mut BufferFile, reference: &mut File) {
        let len = self.rng.gen_range(0..self.max_size);
        let mut b1 = vec![0u8; len];
        let mut b2 = vec![0u8; len];

        let mut n1 = 0;
        while n1 < len {
            let n = primary.read(&mut b1[n1..]).await.expect("buffer read failed");
            if n == 0 {
                break;
            }
            n1 += n;
        }
        let mut n2 = 0;
        while n2 < len {
            let n = reference.read_slice(&mut b2[n2..]).await.expect("reference read failed");
            if n == 0 {
                break;
            }
            n2 += n;
        }

        assert_eq!(n1, n2, "event {event}: read({len}) lengths diverge");
        assert!(b1[..n1] == b2[..n2], "event {event}: read({len}) bytes diverge");
    }

    async fn write_event(&mut self, event: usize, primary: &mut BufferFile, reference: &mut File) {
        let len = self.rng.gen_range(0..self.max_size);
        let mut data = vec![0u8; len];
        self.rng.fill_bytes(&mut data);

        let n1 = primary.write(&data).await.expect("buffer write failed");
        let n2 = reference.write_slice(&data).await.expect("reference write failed");
        assert_eq!(n1, n2, "event {event}: write({len}) lengths diverge");
    }

    async fn seek_event(&mut self, event: usize, primary: &mut BufferFile, reference: &mut File) {
        let offset = self.rng.gen_range(0..self.max_size as u64);
        let pos = match self.rng.gen_range(0..3) {
            0 => SeekFrom::Start(offset),
            1 => SeekFrom::Current(i64::try_from(offset).expect("bounded by max_size")),
            _ => SeekFrom::End(i64::try_from(offset).expect("bounded by max_size")),
        };

        let p1 = primary.seek(pos).await.expect("buffer seek failed");
        let p2 = reference.seek(pos).await.expect("reference seek failed");
        assert_eq!(p1, p2, "event {event}: seek({pos:?}) positions diverge");
    }
}

async fn read_all_buffer(buffer: &mut BufferFile) -> Vec<u8> {
    buffer.seek(SeekFrom::Start(0)).await.expect("buffer rewind failed");
    let mut contents = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = buffer.read(&mut chunk).await.expect("buffer read failed");
        if n == 0 {
            return contents;
        }
        contents.extend_from_slice(&chunk[..n]);
    }
}

async fn read_all_file(file: &mut File) -> Vec<u8> {
    file.seek(SeekFrom::Start(0)).await.expect("reference rewind failed");
    let mut contents = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = file.read_slice(&mut chunk).await.expect("reference read failed");
        if n == 0 {
            return contents;
        }
        contents.extend_from_slice(&chunk[..n]);
    }
}
