//! In-memory FIFO of pending export jobs plus the drain flag.
//!
//! Jobs and the `processing` flag live behind one lock so that "queue is
//! empty, go idle" and "job appended, is anyone draining?" can never
//! interleave and strand a job.
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::Job;

#[derive(Debug, Default)]
struct Inner {
    jobs: VecDeque<Job>,
    processing: bool,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job; returns its 1-based position.
    pub fn enqueue(&self, job: Job) -> usize {
        let mut inner = self.lock();
        inner.jobs.push_back(job);
        inner.jobs.len()
    }

    /// Pop the oldest job, if any.
    pub fn dequeue(&self) -> Option<Job> {
        self.lock().jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    /// Read length and flag under a single lock.
    pub fn observe(&self) -> (usize, bool) {
        let inner = self.lock();
        (inner.jobs.len(), inner.processing)
    }

    /// Append a job and claim the drain if nobody holds it. Returns the
    /// job's position and whether the caller must start draining.
    pub(crate) fn enqueue_and_claim(&self, job: Job) -> (usize, bool) {
        let mut inner = self.lock();
        inner.jobs.push_back(job);
        let claimed = !inner.processing;
        inner.processing = true;
        (inner.jobs.len(), claimed)
    }

    /// Pop the next job for the active drain; when none is left the drain is
    /// released in the same critical section.
    pub(crate) fn next_or_release(&self) -> Option<Job> {
        let mut inner = self.lock();
        let job = inner.jobs.pop_front();
        if job.is_none() {
            inner.processing = false;
        }
        job
    }

    /// Release the drain while leaving queued jobs in place. Returns how many
    /// jobs were left behind at the moment of release.
    pub(crate) fn release(&self) -> usize {
        let mut inner = self.lock();
        inner.processing = false;
        inner.jobs.len()
    }
}
