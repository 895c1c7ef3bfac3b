use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::admission::AdmissionState;

/// Work for one accepted connection.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Whether a strategy took ownership of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The job was dropped without running; its connection is closed.
    Refused,
}

/// How a blocking server runs connection loops.
pub trait ExecutionStrategy: Send + Sync {
    /// Start `job` or refuse it.
    fn execute(&self, job: Job) -> Admission;

    /// Jobs admitted and not yet finished.
    fn active(&self) -> usize;

    /// Stop taking work and wait up to `drain_timeout` for in-flight jobs.
    /// Returns true if everything finished in time.
    fn shutdown(&self, drain_timeout: Duration) -> bool;

    fn name(&self) -> &'static str;
}

/// One dedicated OS thread per connection, no admission limit.
#[derive(Debug)]
pub struct ThreadPerConnection {
    in_flight: Arc<AdmissionState>,
    next_id: AtomicU64,
}

impl ThreadPerConnection {
    pub fn new() -> Self {
        Self {
            in_flight: AdmissionState::unbounded(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for ThreadPerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStrategy for ThreadPerConnection {
    fn execute(&self, job: Job) -> Admission {
        let Some(permit) = self.in_flight.try_admit() else {
            return Admission::Refused;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spawned = thread::Builder::new()
            .name(format!("muxlink-conn-{id}"))
            .spawn(move || {
                let _permit = permit;
                job();
            });
        match spawned {
            Ok(_) => {
                trace!(id, "connection thread started");
                Admission::Accepted
            }
            Err(err) => {
                warn!(error = %err, "failed to spawn connection thread");
                Admission::Refused
            }
        }
    }

    fn active(&self) -> usize {
        self.in_flight.pending()
    }

    fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.in_flight.wait_idle(drain_timeout)
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn runs_each_job_on_its_own_thread() {
        let strategy = ThreadPerConnection::new();
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            let job: Job = Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send(name).unwrap();
            });
            assert_eq!(strategy.execute(job), Admission::Accepted);
        }
        drop(tx);

        let mut names: Vec<_> = rx.iter().flatten().collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("muxlink-conn-")));
        assert!(strategy.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn shutdown_waits_for_running_jobs() {
        let strategy = ThreadPerConnection::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        strategy.execute(Box::new(move || {
            let _ = release_rx.recv();
        }));
        assert_eq!(strategy.active(), 1);
        assert!(!strategy.shutdown(Duration::from_millis(30)));

        release_tx.send(()).unwrap();
        assert!(strategy.shutdown(Duration::from_secs(2)));
        assert_eq!(strategy.active(), 0);
    }
}
