use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::lock;

/// Counts admitted connections against a ceiling.
///
/// The count is checked and incremented under one lock, so concurrent
/// accepts can never overshoot the ceiling.
#[derive(Debug)]
pub struct AdmissionState {
    count: Mutex<usize>,
    idle: Condvar,
    ceiling: usize,
}

/// Holds one admission slot; releases it on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    state: Arc<AdmissionState>,
}

impl AdmissionState {
    pub fn new(ceiling: usize) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
            ceiling,
        })
    }

    /// Without a ceiling: used purely as an in-flight counter.
    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    /// Claim a slot, or `None` when the ceiling has been reached.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let mut count = lock(&self.count);
        if *count >= self.ceiling {
            return None;
        }
        *count += 1;
        Some(AdmissionPermit {
            state: Arc::clone(self),
        })
    }

    pub fn pending(&self) -> usize {
        *lock(&self.count)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Block until every permit has been released or `timeout` passes.
    /// Returns true if the count reached zero.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let count = lock(&self.count);
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |n| *n > 0)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *count == 0
    }

    fn release(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.state.release();
    }
}
