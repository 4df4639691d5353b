// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Upper bound on worker threads. Filesystem syscalls are short; a
/// handful of threads keeps the queue moving without competing with the
/// executor for cores.
const MAX_WORKERS: usize = 4;

/// How long a worker waits for its next job before exiting.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker accounting. The lock also serializes job scheduling against
/// worker exit, so a queued job can never be stranded by a worker that
/// times out at the same instant.
#[derive(Debug, Default)]
struct Workers {
    /// Threads currently alive.
    alive: usize,
    /// Threads blocked waiting for a job.
    idle: usize,
}

struct Inner {
    jobs_tx: flume::Sender<async_task::Runnable>,
    jobs_rx: flume::Receiver<async_task::Runnable>,
    workers: Mutex<Workers>,
}

/// Runs blocking filesystem syscalls on behalf of the async API.
///
/// The pool is fully lazy: it starts with no threads, and a submission
/// that finds no idle worker starts one (up to [`MAX_WORKERS`]). A
/// worker that sits idle for [`IDLE_TIMEOUT`] exits, so a quiet filer
/// holds no threads at all.
#[derive(Clone)]
pub(crate) struct IoPool {
    inner: Arc<Inner>,
}

impl IoPool {
    pub(crate) fn new() -> Self {
        let (jobs_tx, jobs_rx) = flume::unbounded();
        Self {
            inner: Arc::new(Inner {
                jobs_tx,
                jobs_rx,
                workers: Mutex::new(Workers::default()),
            }),
        }
    }

    /// Runs `op` on a worker thread, resolving to its return value.
    ///
    /// The job is queued immediately; the returned future only observes
    /// completion. If `op` panics, the panic is re-raised on the awaiting
    /// task via [`std::panic::resume_unwind`].
    pub(crate) fn submit<T: Send + 'static>(
        &self,
        op: impl FnOnce() -> T + Send + 'static,
    ) -> impl Future<Output = T> + Send + 'static {
        let queue = self.inner.jobs_tx.clone();
        let (runnable, job) = async_task::spawn(
            async move { std::panic::catch_unwind(AssertUnwindSafe(op)) },
            move |runnable| {
                let _ = queue.send(runnable);
            },
        );

        // Queue the job and decide whether it needs a new worker, in one
        // critical section: a worker deciding to exit re-checks the queue
        // under this same lock, so the job is seen by somebody.
        let start_worker = {
            let mut workers = self.inner.workers.lock();
            let start = workers.idle == 0 && workers.alive < MAX_WORKERS;
            if start {
                workers.alive += 1;
            }
            runnable.schedule();
            start
        };
        if start_worker {
            self.start_worker();
        }

        async move {
            match job.await {
                Ok(value) => value,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    }

    fn start_worker(&self) {
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("filer-io".into())
            .spawn(move || worker_loop(&inner))
            .expect("failed to spawn filer worker thread");
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        inner.workers.lock().idle += 1;
        let job = inner.jobs_rx.recv_timeout(IDLE_TIMEOUT);

        let mut workers = inner.workers.lock();
        workers.idle -= 1;
        match job {
            Ok(runnable) => {
                drop(workers);
                let _ = runnable.run();
            }
            Err(_) => {
                // A submission may have queued a job against this
                // worker's idle slot just before the timeout; one last
                // look under the lock before the thread dies.
                if let Ok(runnable) = inner.jobs_rx.try_recv() {
                    drop(workers);
                    let _ = runnable.run();
                } else {
                    workers.alive -= 1;
                    return;
                }
            }
        }
    }
}

impl core::fmt::Debug for IoPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let workers = self.inner.workers.lock();
        f.debug_struct("IoPool")
            .field("alive", &workers.alive)
            .field("idle", &workers.idle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_returns_the_value() {
        let pool = IoPool::new();
        let value = pool.submit(|| 21 * 2).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn submissions_run_concurrently() {
        let pool = IoPool::new();
        let jobs: Vec<_> = (0..64).map(|i| pool.submit(move || i * 2)).collect();
        let results = futures::future::join_all(jobs).await;
        assert_eq!(results, (0..64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn worker_count_stays_bounded() {
        let pool = IoPool::new();
        let jobs: Vec<_> = (0..256)
            .map(|_| pool.submit(|| std::thread::sleep(Duration::from_micros(100))))
            .collect();
        futures::future::join_all(jobs).await;
        assert!(pool.inner.workers.lock().alive <= MAX_WORKERS);
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn submit_forwards_panics() {
        let pool = IoPool::new();
        pool.submit(|| panic!("boom")).await;
    }
}
