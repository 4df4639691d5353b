// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for [`Filer`] lifecycle, admission, and shutdown.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filer::{Error, Filer};
use quiesce::Latch;
use tracing_subscriber::fmt::MakeWriter;

#[tokio::test]
async fn temp_file_names_carry_prefix_and_suffix() {
    let filer = Filer::new(0);
    assert!(filer.fd_limit() >= 1);

    let mut file = filer.temp_file("testfile1-", ".txt").await.unwrap();
    let name = file.path().file_name().unwrap().to_str().unwrap().to_owned();
    assert!(name.starts_with("testfile1-"), "bad temp name {name}");
    assert!(name.ends_with(".txt"), "bad temp name {name}");
    assert!(name.len() > "testfile1-.txt".len(), "no random fragment in {name}");

    let path = file.path().to_path_buf();
    file.close().await.unwrap();
    assert!(!path.exists(), "temp file survived close");
}

#[tokio::test]
async fn open_missing_file_reports_not_found() {
    let filer = Filer::new(4);
    match filer.open("/does-not-exist/filer-test").await {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected NotFound, got {other:?}"),
    }
    // The admission token was released with the failed open.
    assert_eq!(filer.open_handles(), 0);
}

#[tokio::test]
async fn reopen_a_temp_file_by_path() {
    let filer = Filer::new(4);
    let mut file = filer.temp_file("testfile1-", ".txt").await.unwrap();
    file.write_slice(b"contents").await.unwrap();

    let mut dup = filer.open(file.path()).await.unwrap();
    assert_eq!(dup.path(), file.path());
    let mut buf = [0u8; 8];
    assert_eq!(dup.read_slice(&mut buf).await.unwrap(), 8);
    assert_eq!(&buf, b"contents");

    dup.close().await.unwrap();
    file.close().await.unwrap();
}

#[tokio::test]
async fn double_close_reports_already_closed() {
    let filer = Filer::new(4);
    let mut file = filer.temp_file("testfile1-", "").await.unwrap();
    file.close().await.unwrap();
    match file.close().await {
        Err(Error::AlreadyClosed) => {}
        other => panic!("expected AlreadyClosed, got {other:?}"),
    }
}

#[tokio::test]
async fn admission_blocks_at_the_limit() {
    let filer = Filer::new(1);
    let mut first = filer.temp_file("held-", "").await.unwrap();
    assert_eq!(filer.open_handles(), 1);

    let second = {
        let filer = filer.clone();
        tokio::spawn(async move { filer.temp_file("blocked-", "").await })
    };

    // The second open cannot proceed while the first holds the only token.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished(), "open proceeded past the descriptor budget");

    first.close().await.unwrap();
    let mut second = second.await.unwrap().unwrap();
    assert_eq!(filer.open_handles(), 1);
    second.close().await.unwrap();
}

#[tokio::test]
async fn clean_shutdown_waits_for_handles_and_cancels_waiters() {
    let filer = Filer::new(2);
    let mut f1 = filer.temp_file("testfile1-", "").await.unwrap();
    let mut f2 = filer.temp_file("testfile2-", "").await.unwrap();

    let worker = {
        let filer = filer.clone();
        tokio::spawn(async move {
            // Blocks on admission until shutdown begins, then fails.
            let third = filer.temp_file("testfile3-", "").await;
            f1.close().await.unwrap();
            f2.close().await.unwrap();
            third
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    filer.shutdown(std::future::pending()).await.unwrap();

    match worker.await.unwrap() {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled for the blocked open, got {other:?}"),
    }

    match filer.open("/tmp/never-created").await {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled after shutdown, got {other:?}"),
    }
    match filer.temp_file("never-", "").await {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled after shutdown, got {other:?}"),
    }
}

#[tokio::test]
async fn forced_shutdown_reaps_live_handles() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let filer = Filer::new(3);
    let mut f1 = filer.temp_file("held1-", "").await.unwrap();
    let f2 = filer.temp_file("held2-", "").await.unwrap();
    let f2_path = f2.path().to_path_buf();

    // A buffer that never spills should hold no resources and go
    // unmentioned in the shutdown log.
    let mut quiet = filer.buffer_file(16);
    quiet.write(b"tiny").await.unwrap();

    // A buffer that spilled holds a temp file that shutdown must reap.
    let mut spilled = filer.buffer_file(1);
    spilled.write(b"ab").await.unwrap();
    assert!(spilled.spilled());

    let cancel = Arc::new(Latch::new());
    let shutdown = {
        let filer = filer.clone();
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move { filer.shutdown(async move { cancel.wait().await }).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!shutdown.is_finished(), "shutdown returned with live handles");
    match filer.temp_file("canceled-", "").await {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled during drain, got {other:?}"),
    }

    cancel.open();
    match shutdown.await.unwrap() {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled from forced shutdown, got {other:?}"),
    }

    // Force-closed handles: descriptors gone, temp files unlinked,
    // tokens returned; a late close still reports AlreadyClosed.
    assert_eq!(filer.open_handles(), 0);
    assert!(!f2_path.exists(), "temp file survived forced shutdown");
    match f1.close().await {
        Err(Error::AlreadyClosed) => {}
        other => panic!("expected AlreadyClosed after forced shutdown, got {other:?}"),
    }

    let log = capture.output();
    assert_eq!(log.matches("waiting for").count(), 3, "log:\n{log}");
    assert_eq!(log.matches("closing file").count(), 3, "log:\n{log}");
    assert!(log.contains("tests/filer.rs"), "log does not name the origin:\n{log}");

    drop(f2);
    drop(quiet);
    drop(spilled);
}

/// Captures formatted `tracing` output for assertions.
#[derive(Clone, Default)]
struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    fn new() -> Self {
        Self::default()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(self.clone())
                .with_ansi(false),
        )
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
