//! Pool worker: pulls one job at a time and routes its attempt outcome.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use taskqueue_core::{Deadline, Job, JobResult, JobStatus};

use crate::events::{PoolEvent, StopReason};
use crate::pool::PoolShared;
use crate::processor::{Attempt, Processor};

/// Receive end of the job queue, shared by every worker.
///
/// Each job is taken by exactly one receiver, so two workers never hold the
/// same job.
pub type SharedJobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// One worker of the pool.
///
/// For every dequeued job exactly one of the following happens: the job is
/// forwarded to the retry coordinator, or a [`JobResult`] is emitted. The
/// only exception is deadline expiry, which abandons the job.
pub struct Worker {
    id: usize,
    jobs: SharedJobQueue,
    results: mpsc::Sender<JobResult>,
    retries: mpsc::Sender<Job>,
    deadline: Deadline,
    processor: Arc<dyn Processor>,
    shared: Arc<PoolShared>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        jobs: SharedJobQueue,
        results: mpsc::Sender<JobResult>,
        retries: mpsc::Sender<Job>,
        deadline: Deadline,
        processor: Arc<dyn Processor>,
        shared: Arc<PoolShared>,
    ) -> Self {
        Self {
            id,
            jobs,
            results,
            retries,
            deadline,
            processor,
            shared,
        }
    }

    /// Run until the job queue is closed and drained, or the deadline fires.
    ///
    /// Dropping the worker on return releases its result and retry senders;
    /// the retry channel closes once the last worker has returned.
    #[instrument(name = "worker", skip_all, fields(run_id = %self.shared.run_id, worker_id = self.id))]
    pub async fn run(self) -> StopReason {
        info!(processor = self.processor.name(), "Worker started");
        self.shared.emit(PoolEvent::WorkerStarted { worker_id: self.id });

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.deadline.cancelled() => break StopReason::Deadline,
                job = self.next_job() => job,
            };

            let Some(job) = next else {
                break StopReason::QueueClosed;
            };

            if self.handle(job).await.is_break() {
                break StopReason::Deadline;
            }
        };

        match reason {
            StopReason::Deadline => info!("Deadline fired, worker exiting"),
            StopReason::QueueClosed => info!("No more jobs, worker exiting"),
        }
        self.shared.emit(PoolEvent::WorkerStopped {
            worker_id: self.id,
            reason,
        });
        reason
    }

    async fn next_job(&self) -> Option<Job> {
        self.jobs.lock().await.recv().await
    }

    /// Process one attempt. Breaks when the deadline abandoned the job.
    async fn handle(&self, mut job: Job) -> ControlFlow<()> {
        let start = Instant::now();
        let attempt_no = job.retry_count + 1;
        self.shared.stats.record_attempt();
        debug!(job_id = job.id, payload = job.payload, attempt = attempt_no, "Processing job");

        let attempt = tokio::select! {
            biased;
            _ = self.deadline.cancelled() => {
                self.abandon(job.id);
                return ControlFlow::Break(());
            }
            attempt = self.processor.process(&job) => attempt,
        };

        match attempt {
            Attempt::Success(output) => {
                let result = JobResult::success(&job, self.id, output, start.elapsed());
                let event = PoolEvent::JobCompleted {
                    job_id: job.id,
                    worker_id: self.id,
                    output,
                };
                self.emit_result(result, event).await
            }
            Attempt::Failed(reason) => {
                debug!(job_id = job.id, attempt = attempt_no, %reason, "Attempt failed");
                self.shared.emit(PoolEvent::AttemptFailed {
                    job_id: job.id,
                    worker_id: self.id,
                    attempt: attempt_no,
                });

                if job.record_failure() {
                    self.forward_retry(job).await
                } else {
                    let result = JobResult::failed(&job, self.id, start.elapsed());
                    let event = PoolEvent::JobFailed {
                        job_id: job.id,
                        worker_id: self.id,
                        retry_count: job.retry_count,
                    };
                    self.emit_result(result, event).await
                }
            }
        }
    }

    async fn forward_retry(&self, job: Job) -> ControlFlow<()> {
        let job_id = job.id;
        let retry_count = job.retry_count;

        tokio::select! {
            biased;
            _ = self.deadline.cancelled() => {
                self.abandon(job_id);
                ControlFlow::Break(())
            }
            sent = self.retries.send(job) => match sent {
                Ok(()) => {
                    debug!(job_id, retry_count, "Forwarded job to retry coordinator");
                    ControlFlow::Continue(())
                }
                Err(_) => self.closed_queue("retry", job_id),
            }
        }
    }

    /// Deliver a terminal result; `event` is broadcast once it was accepted.
    async fn emit_result(&self, result: JobResult, event: PoolEvent) -> ControlFlow<()> {
        let job_id = result.job_id;
        let status = result.status;
        let output = result.output;
        let retry_count = result.retry_count;
        let duration_ms = result.duration.as_millis() as u64;

        tokio::select! {
            biased;
            _ = self.deadline.cancelled() => {
                self.abandon(job_id);
                ControlFlow::Break(())
            }
            sent = self.results.send(result) => match sent {
                Ok(()) => {
                    self.shared.ledger.settle();
                    match status {
                        JobStatus::Success => {
                            info!(job_id, ?output, retry_count, duration_ms, "Job completed")
                        }
                        JobStatus::Failed => {
                            warn!(job_id, retry_count, duration_ms, "Job permanently failed")
                        }
                    }
                    self.shared.emit(event);
                    ControlFlow::Continue(())
                }
                Err(_) => self.closed_queue("result", job_id),
            }
        }
    }

    /// A send failed because the receiving end is gone.
    ///
    /// After the deadline this is the expected teardown order; before it, the
    /// shutdown sequence was violated.
    fn closed_queue(&self, queue: &'static str, job_id: u64) -> ControlFlow<()> {
        if self.deadline.is_live() {
            error!(job_id, queue, "Send on closed queue while run is live");
            self.shared.stats.record_protocol_violation();
            self.shared.ledger.settle();
            ControlFlow::Continue(())
        } else {
            self.abandon(job_id);
            ControlFlow::Break(())
        }
    }

    fn abandon(&self, job_id: u64) {
        debug!(job_id, "Deadline fired, abandoning job");
        self.shared.stats.record_abandoned();
        self.shared.ledger.settle();
        self.shared.emit(PoolEvent::JobAbandoned {
            job_id,
            worker_id: self.id,
        });
    }
}
