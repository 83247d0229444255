//! Fixed-size worker pool for off-plan work.
//!
//! The engine uses two of these: one whose jobs are entire plan dispatch
//! loops, and one offered to [`Task::blocking`](crate::task::Task::blocking)
//! for user code that would otherwise stall a dispatch thread. Jobs queue on
//! a lock-free queue; idle workers park on a condvar.

use crate::task::factory::Executor;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: SegQueue<Job>,
    mutex: Mutex<()>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

/// A fixed-size thread pool executing boxed jobs in submission order
/// (approximately; workers race for jobs).
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `threads` workers named `{name_prefix}-{index}`.
    pub(crate) fn new(name_prefix: &str, threads: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..threads)
            .map(|index| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("{name_prefix}-{index}"))
                    .spawn(move || Self::worker_loop(&inner))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        debug!(pool = name_prefix, threads, "worker pool started");
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    fn worker_loop(inner: &PoolInner) {
        loop {
            if let Some(job) = inner.queue.pop() {
                job();
                continue;
            }
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            let guard = inner.mutex.lock().expect("pool lock poisoned");
            // Re-check under the lock so a submit between pop and park is
            // not lost.
            if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                let _guard = inner
                    .condvar
                    .wait(guard)
                    .expect("pool lock poisoned");
            }
        }
    }

    /// Submits a job. Returns false (dropping the job) after shutdown.
    pub(crate) fn submit(&self, job: Job) -> bool {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return false;
        }
        self.inner.queue.push(job);
        let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
        self.inner.condvar.notify_one();
        true
    }

    /// Stops accepting work and joins all workers. Idempotent.
    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
            self.inner.condvar.notify_all();
        }
        let workers = {
            let mut workers = self.workers.lock().expect("pool lock poisoned");
            std::mem::take(&mut *workers)
        };
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        let _ = self.submit(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn executes_submitted_jobs() {
        let pool = WorkerPool::new("test-pool", 2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 16 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        pool.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = WorkerPool::new("idle-pool", 1);
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn jobs_after_shutdown_are_dropped() {
        let pool = WorkerPool::new("closed-pool", 1);
        pool.shutdown();
        let hit = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&hit);
        assert!(!pool.submit(Box::new(move || h.store(true, Ordering::SeqCst))));
        thread::sleep(Duration::from_millis(20));
        assert!(!hit.load(Ordering::SeqCst));
    }
}
