use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::admission::AdmissionState;
use crate::lock;
use crate::strategy::{Admission, ExecutionStrategy, Job};

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 200;
/// Default ceiling on admitted (running plus queued) connections.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// Fixed-size worker pool with an admission ceiling.
///
/// Jobs beyond the worker count queue until a worker frees up. Once
/// `max_pending` jobs are admitted, further jobs are refused.
pub struct WorkerPool {
    workers: usize,
    admission: Arc<AdmissionState>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    sender: Option<Sender<Job>>,
    receiver: Arc<Mutex<Receiver<Job>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, max_pending: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            workers: workers.max(1),
            admission: AdmissionState::new(max_pending.max(1)),
            inner: Mutex::new(PoolInner {
                sender: Some(sender),
                receiver: Arc::new(Mutex::new(receiver)),
                handles: Vec::new(),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_pending(&self) -> usize {
        self.admission.ceiling()
    }

    /// Worker threads started so far. Workers are spawned on demand.
    pub fn spawned(&self) -> usize {
        lock(&self.inner).handles.len()
    }

    fn spawn_worker(inner: &mut PoolInner) {
        let id = inner.handles.len();
        let receiver = Arc::clone(&inner.receiver);
        let spawned = thread::Builder::new()
            .name(format!("muxlink-worker-{id}"))
            .spawn(move || worker_loop(id, &receiver));
        match spawned {
            Ok(handle) => inner.handles.push(handle),
            Err(err) => warn!(id, error = %err, "failed to spawn pool worker"),
        }
    }
}

fn worker_loop(id: usize, receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = lock(receiver).recv();
        match job {
            Ok(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(worker = id, "connection job panicked");
                }
            }
            Err(_) => break,
        }
    }
    debug!(worker = id, "pool worker exiting");
}

impl ExecutionStrategy for WorkerPool {
    fn execute(&self, job: Job) -> Admission {
        let Some(permit) = self.admission.try_admit() else {
            return Admission::Refused;
        };

        let mut inner = lock(&self.inner);
        if inner.sender.is_none() {
            return Admission::Refused;
        }
        if inner.handles.len() < self.workers {
            Self::spawn_worker(&mut inner);
        }
        if inner.handles.is_empty() {
            return Admission::Refused;
        }

        let wrapped: Job = Box::new(move || {
            let _permit = permit;
            job();
        });
        match inner.sender.as_ref().map(|tx| tx.send(wrapped)) {
            Some(Ok(())) => Admission::Accepted,
            _ => Admission::Refused,
        }
    }

    fn active(&self) -> usize {
        self.admission.pending()
    }

    fn shutdown(&self, drain_timeout: Duration) -> bool {
        // Workers exit once the queue is empty and the sender is gone.
        let handles = {
            let mut inner = lock(&self.inner);
            inner.sender.take();
            std::mem::take(&mut inner.handles)
        };

        if !self.admission.wait_idle(drain_timeout) {
            warn!(
                active = self.admission.pending(),
                "worker pool did not drain in time"
            );
            return false;
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("pool worker panicked");
            }
        }
        true
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("max_pending", &self.admission.ceiling())
            .field("active", &self.admission.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use super::*;

    #[test]
    fn runs_jobs_on_bounded_workers() {
        let pool = WorkerPool::new(2, 100);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            let job: Job = Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(pool.execute(job), Admission::Accepted);
        }
        assert!(pool.spawned() <= 2);
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn refuses_beyond_max_pending() {
        let pool = WorkerPool::new(2, 3);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        // Two jobs run and block, one more queues.
        for _ in 0..3 {
            let release_rx = Arc::clone(&release_rx);
            let job: Job = Box::new(move || {
                let _ = lock(&release_rx).recv();
            });
            assert_eq!(pool.execute(job), Admission::Accepted);
        }
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.execute(Box::new(|| {})), Admission::Refused);

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn refuses_after_shutdown() {
        let pool = WorkerPool::new(1, 10);
        assert!(pool.shutdown(Duration::from_millis(100)));
        assert_eq!(pool.execute(Box::new(|| {})), Admission::Refused);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new(1, 10);
        pool.execute(Box::new(|| panic!("job failure")));

        let barrier = Arc::new(Barrier::new(2));
        let seen = Arc::clone(&barrier);
        pool.execute(Box::new(move || {
            seen.wait();
        }));
        barrier.wait();

        assert_eq!(pool.spawned(), 1);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_reports_undrained_work() {
        let pool = WorkerPool::new(1, 10);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.execute(Box::new(move || {
            let _ = release_rx.recv();
        }));
        assert!(!pool.shutdown(Duration::from_millis(30)));
        release_tx.send(()).unwrap();
    }
}
