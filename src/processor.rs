//! Single-flight drain loop over the [`JobQueue`].
//!
//! `submit` appends a job and, if the queue was idle, hands the drain off to a
//! spawned task. The task runs one export per job in FIFO order until the
//! queue is empty or an export fails; on failure the remaining jobs stay
//! queued and the next `submit` resumes from the head.
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, instrument};

use crate::error::ExportError;
use crate::exporter::Exporter;
use crate::model::{ExportResult, Job, StatusSnapshot};
use crate::queue::JobQueue;
use crate::source::ProductSource;

const EVENT_CAPACITY: usize = 64;

/// Progress notifications emitted by the drain loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainEvent {
    JobStarted(Job),
    JobSucceeded { job: Job, valid: usize, invalid: usize },
    /// The loop stopped; `remaining` jobs are still queued.
    JobFailed { job: Job, error: String, remaining: usize },
    Idle,
}

pub struct Processor {
    queue: Arc<JobQueue>,
    exporter: Arc<Exporter>,
    source: Arc<dyn ProductSource>,
    merchant_id: Option<String>,
    // Held for the duration of every export, queued or manual.
    run_lock: Mutex<()>,
    events: broadcast::Sender<DrainEvent>,
}

impl Processor {
    pub fn new(
        queue: Arc<JobQueue>,
        exporter: Arc<Exporter>,
        source: Arc<dyn ProductSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            exporter,
            source,
            merchant_id: None,
            run_lock: Mutex::new(()),
            events,
        }
    }

    pub fn with_merchant_id(mut self, merchant_id: Option<String>) -> Self {
        self.merchant_id = merchant_id;
        self
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DrainEvent> {
        self.events.subscribe()
    }

    /// Enqueue a job and return its 1-based queue position. Never waits for
    /// the export itself.
    pub fn submit(self: &Arc<Self>, triggered_by: impl Into<String>, product_id: Option<String>) -> usize {
        let job = Job::new(triggered_by, product_id);
        info!(
            triggered_by = %job.triggered_by,
            product_id = ?job.product_id,
            "job enqueued"
        );
        let (position, claimed) = self.queue.enqueue_and_claim(job);
        if claimed {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain().await });
        }
        position
    }

    pub fn status(&self) -> StatusSnapshot {
        let (queue_length, is_processing) = self.queue.observe();
        StatusSnapshot {
            queue_length,
            is_processing,
            server_time: Utc::now(),
        }
    }

    /// Run the pipeline once outside the queue. Waits for any in-flight
    /// queued export so the CSV files are never written concurrently.
    #[instrument(skip_all)]
    pub async fn run_now(&self) -> Result<ExportResult, ExportError> {
        let _guard = self.run_lock.lock().await;
        self.exporter.run(self.source.as_ref()).await
    }

    #[instrument(skip_all)]
    async fn drain(&self) {
        let mut claim = DrainClaim::new(&self.queue);
        while let Some(job) = claim.next() {
            info!(
                triggered_by = %job.triggered_by,
                queued_at = %job.timestamp,
                "processing job"
            );
            self.emit(DrainEvent::JobStarted(job.clone()));

            let outcome = {
                let _guard = self.run_lock.lock().await;
                self.exporter.run(self.source.as_ref()).await
            };

            match outcome {
                Ok(result) => {
                    info!(
                        valid = result.valid_count(),
                        invalid = result.invalid_count(),
                        "processed csv feeds"
                    );
                    info!(
                        merchant_id = ?self.merchant_id,
                        path = %result.valid_path.display(),
                        "valid feed ready for merchant upload"
                    );
                    self.emit(DrainEvent::JobSucceeded {
                        job,
                        valid: result.valid_count(),
                        invalid: result.invalid_count(),
                    });
                }
                Err(err) => {
                    let remaining = claim.release();
                    error!(
                        ?err,
                        triggered_by = %job.triggered_by,
                        remaining,
                        "export job failed; queue stopped"
                    );
                    self.emit(DrainEvent::JobFailed {
                        job,
                        error: err.to_string(),
                        remaining,
                    });
                    return;
                }
            }
        }
        self.emit(DrainEvent::Idle);
    }

    fn emit(&self, event: DrainEvent) {
        // No subscribers is the normal case outside tests.
        let _ = self.events.send(event);
    }
}

/// The drain claim taken by `submit`. If the drain task unwinds while the
/// claim is held, dropping it releases the queue so a later submit can
/// restart draining.
struct DrainClaim<'a> {
    queue: &'a JobQueue,
    held: bool,
}

impl<'a> DrainClaim<'a> {
    fn new(queue: &'a JobQueue) -> Self {
        Self { queue, held: true }
    }

    fn next(&mut self) -> Option<Job> {
        let job = self.queue.next_or_release();
        if job.is_none() {
            self.held = false;
        }
        job
    }

    fn release(mut self) -> usize {
        self.held = false;
        self.queue.release()
    }
}

impl Drop for DrainClaim<'_> {
    fn drop(&mut self) {
        if self.held {
            self.queue.release();
        }
    }
}
