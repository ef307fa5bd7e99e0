//! Retry coordinator: the single owner of the retry feedback loop.
//!
//! The coordinator never sleeps on its own path. Each retry gets a detached
//! timed task on a [`TaskTracker`]; the task waits out the backoff (or the
//! deadline, whichever comes first) and pushes the job back onto the job
//! queue. The coordinator waits for every task it spawned before returning,
//! so no timed task outlives it.
//!
//! Timed tasks only hold a [`mpsc::WeakSender`] to the job queue. The driver
//! owns the sole strong sender and drops it only once every admitted job has
//! settled; a task that fails to upgrade has therefore observed the end of
//! the run and drops its job instead of writing to a closed queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use taskqueue_core::{Deadline, Job};

use crate::events::PoolEvent;
use crate::pool::PoolShared;

/// Receives failed-but-retryable jobs and re-enqueues them after backoff.
pub struct RetryCoordinator {
    retries: mpsc::Receiver<Job>,
    jobs: mpsc::WeakSender<Job>,
    deadline: Deadline,
    shared: Arc<PoolShared>,
    tasks: TaskTracker,
}

impl RetryCoordinator {
    pub(crate) fn new(
        retries: mpsc::Receiver<Job>,
        jobs: mpsc::WeakSender<Job>,
        deadline: Deadline,
        shared: Arc<PoolShared>,
    ) -> Self {
        Self {
            retries,
            jobs,
            deadline,
            shared,
            tasks: TaskTracker::new(),
        }
    }

    /// Run until the retry channel is closed and drained, or the deadline
    /// fires. Returns the number of retries scheduled.
    #[instrument(name = "retry_coordinator", skip_all, fields(run_id = %self.shared.run_id))]
    pub async fn run(mut self) -> usize {
        let mut scheduled = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.deadline.cancelled() => {
                    info!("Deadline fired, stopping retries");
                    self.discard_pending();
                    break;
                }
                next = self.retries.recv() => match next {
                    Some(job) => {
                        self.schedule(job);
                        scheduled += 1;
                    }
                    None => {
                        info!("Retry channel closed");
                        break;
                    }
                }
            }
        }

        self.tasks.close();
        if !self.tasks.is_empty() {
            debug!(pending = self.tasks.len(), "Waiting for timed retry tasks");
        }
        self.tasks.wait().await;

        info!(scheduled, "Retry coordinator stopped");
        scheduled
    }

    fn schedule(&self, job: Job) {
        let delay = job.backoff_delay();
        info!(
            job_id = job.id,
            retry_count = job.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        self.shared.stats.record_retry_scheduled();
        self.shared.emit(PoolEvent::RetryScheduled {
            job_id: job.id,
            retry_count: job.retry_count,
            delay,
        });

        self.tasks.spawn(requeue_after(
            job,
            delay,
            self.jobs.clone(),
            self.deadline.clone(),
            self.shared.clone(),
        ));
    }

    /// Close the retry channel and drop anything still buffered in it.
    fn discard_pending(&mut self) {
        self.retries.close();
        while let Ok(job) = self.retries.try_recv() {
            drop_retry(&self.shared, job.id, job.retry_count, "run ended before retry was scheduled");
        }
    }
}

/// Wait out `delay`, then push `job` back onto the job queue.
async fn requeue_after(
    job: Job,
    delay: Duration,
    jobs: mpsc::WeakSender<Job>,
    deadline: Deadline,
    shared: Arc<PoolShared>,
) {
    tokio::select! {
        biased;
        _ = deadline.cancelled() => {
            drop_retry(&shared, job.id, job.retry_count, "deadline fired during backoff");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let Some(queue) = jobs.upgrade() else {
        drop_retry(&shared, job.id, job.retry_count, "job queue already closed");
        return;
    };

    let job_id = job.id;
    let retry_count = job.retry_count;

    tokio::select! {
        biased;
        _ = deadline.cancelled() => drop_retry(&shared, job_id, retry_count, "deadline fired while queue was full"),
        sent = queue.send(job) => match sent {
            Ok(()) => {
                debug!(job_id, retry_count, "Requeued job");
                shared.stats.record_requeued();
                shared.emit(PoolEvent::JobRequeued { job_id, retry_count });
            }
            Err(_) => {
                if deadline.is_live() {
                    error!(job_id, "Requeue hit a closed job queue while run is live");
                    shared.stats.record_protocol_violation();
                }
                drop_retry(&shared, job_id, retry_count, "job queue closed during send");
            }
        }
    }
}

fn drop_retry(shared: &PoolShared, job_id: u64, retry_count: u32, why: &str) {
    warn!(job_id, retry_count, why, "Dropping retry");
    shared.stats.record_retry_dropped();
    shared.ledger.settle();
    shared.emit(PoolEvent::RetryDropped {
        job_id,
        retry_count,
    });
}
