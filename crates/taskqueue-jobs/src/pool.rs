//! Driver API: start the pipeline, submit jobs, shut down in order.
//!
//! Queue ownership and closing order:
//!
//! | Queue | Producers | Closed by | Closed when |
//! |-------|-----------|-----------|-------------|
//! | jobs | driver, retry tasks | driver (drops the only strong sender) | every admitted job settled, or deadline |
//! | retries | workers | last worker returning | all workers joined |
//! | results | workers, driver | driver (drops the primary sender) | retry coordinator joined |
//!
//! Every close happens after all producers into that queue have stopped, so
//! a live run never sends on a closed queue.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskqueue_core::{
    Deadline, DeadlineState, Error, Job, JobFactory, JobResult, PoolConfig, Result, Tally,
};

use crate::collector::{CollectorReport, ResultCollector};
use crate::events::{PoolEvent, PoolStats, StatsSnapshot, StopReason};
use crate::ledger::InFlightLedger;
use crate::processor::{Processor, SimulatedProcessor};
use crate::retry::RetryCoordinator;
use crate::worker::Worker;

/// State shared by every component of one pool run.
pub(crate) struct PoolShared {
    pub(crate) run_id: Uuid,
    pub(crate) ledger: InFlightLedger,
    pub(crate) stats: PoolStats,
    event_tx: broadcast::Sender<PoolEvent>,
}

impl PoolShared {
    #[cfg(test)]
    pub(crate) fn for_tests() -> (Arc<Self>, broadcast::Receiver<PoolEvent>) {
        let (event_tx, event_rx) = broadcast::channel(1024);
        let shared = Arc::new(Self {
            run_id: Uuid::now_v7(),
            ledger: InFlightLedger::new(),
            stats: PoolStats::default(),
            event_tx,
        });
        (shared, event_rx)
    }

    /// Best-effort event broadcast.
    pub(crate) fn emit(&self, event: PoolEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Lifecycle phase of a running pool. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Accepting submissions.
    Running,
    /// Submissions refused; waiting for admitted jobs to settle.
    Draining,
    /// Job queue closed; workers finishing.
    JobsClosed,
    /// All workers joined, so the retry channel is closed.
    RetriesClosed,
    /// Retry coordinator and all of its timed tasks joined.
    CoordinatorStopped,
    /// Primary result sender dropped; collector finishing.
    ResultsClosed,
    /// Collector joined.
    Stopped,
}

/// Final summary returned by [`PoolHandle::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub run_id: Uuid,
    pub tally: Tally,
    /// Every result the collector received, in arrival order.
    pub results: Vec<JobResult>,
    pub stats: StatsSnapshot,
    pub deadline_state: DeadlineState,
    /// `true` when every admitted job settled before the job queue closed.
    pub drained: bool,
}

impl PoolReport {
    /// Jobs submitted but never counted (deadline losses).
    pub fn lost(&self) -> u64 {
        self.stats
            .submitted
            .saturating_sub(self.tally.total() as u64)
    }
}

/// A configured pool that has not been started yet.
pub struct WorkerPool {
    config: PoolConfig,
    processor: Arc<dyn Processor>,
    event_tx: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    /// Create a pool that runs `processor` for each attempt.
    pub fn new<P: Processor + 'static>(config: PoolConfig, processor: P) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            processor: Arc::new(processor),
            event_tx,
        }
    }

    /// Create a pool using the simulated processor described by `config`.
    pub fn simulated(config: PoolConfig) -> Self {
        let processor = SimulatedProcessor::from_config(&config);
        Self::new(config, processor)
    }

    /// Subscribe to pool events. Subscribe before [`start`](Self::start) to
    /// see every event of the run.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.event_tx.subscribe()
    }

    /// Create the queues and spawn workers, retry coordinator and collector.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self, deadline: Deadline) -> Result<PoolHandle> {
        self.config.validate()?;

        let config = self.config;
        let shared = Arc::new(PoolShared {
            run_id: Uuid::now_v7(),
            ledger: InFlightLedger::new(),
            stats: PoolStats::default(),
            event_tx: self.event_tx,
        });

        let (job_tx, job_rx) = mpsc::channel::<Job>(config.queue_capacity);
        let (retry_tx, retry_rx) = mpsc::channel::<Job>(config.queue_capacity);
        let (result_tx, result_rx) = mpsc::channel::<JobResult>(config.queue_capacity);

        let collector = tokio::spawn(
            ResultCollector::new(result_rx, deadline.clone(), shared.clone()).run(),
        );

        let coordinator = tokio::spawn(
            RetryCoordinator::new(retry_rx, job_tx.downgrade(), deadline.clone(), shared.clone())
                .run(),
        );

        let jobs = Arc::new(Mutex::new(job_rx));
        let mut workers = JoinSet::new();
        for id in 1..=config.worker_count {
            let worker = Worker::new(
                id,
                jobs.clone(),
                result_tx.clone(),
                retry_tx.clone(),
                deadline.clone(),
                self.processor.clone(),
                shared.clone(),
            );
            workers.spawn(worker.run());
        }
        // Workers hold the only retry senders from here on.
        drop(retry_tx);

        info!(
            run_id = %shared.run_id,
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            processor = self.processor.name(),
            deadline_ms = deadline.remaining().map(|d| d.as_millis() as u64),
            "Worker pool started"
        );

        Ok(PoolHandle {
            factory: JobFactory::from_config(&config),
            shared,
            deadline,
            phase: PoolPhase::Running,
            job_tx: Some(job_tx),
            result_tx: Some(result_tx),
            workers,
            coordinator: Some(coordinator),
            collector: Some(collector),
        })
    }
}

/// Start a pool with the simulated processor.
pub fn start_pool(config: PoolConfig, deadline: Deadline) -> Result<PoolHandle> {
    WorkerPool::simulated(config).start(deadline)
}

/// Handle for submitting to and shutting down a running pool.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) closes
/// the job queue at once and detaches every task: workers drain what is
/// queued in the background and pending retries are dropped.
pub struct PoolHandle {
    shared: Arc<PoolShared>,
    deadline: Deadline,
    factory: JobFactory,
    phase: PoolPhase,
    job_tx: Option<mpsc::Sender<Job>>,
    result_tx: Option<mpsc::Sender<JobResult>>,
    workers: JoinSet<StopReason>,
    coordinator: Option<JoinHandle<usize>>,
    collector: Option<JoinHandle<CollectorReport>>,
}

impl PoolHandle {
    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    pub fn phase(&self) -> PoolPhase {
        self.phase
    }

    /// Subscribe to pool events from now on.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Admitted jobs that have not settled yet.
    pub fn outstanding(&self) -> usize {
        self.shared.ledger.outstanding()
    }

    /// Factory stamping the configured retry defaults.
    pub fn job_factory(&self) -> &JobFactory {
        &self.factory
    }

    /// Enqueue a job. Waits while the queue is full.
    ///
    /// Fails with [`Error::DeadlineExceeded`] once the deadline fired and with
    /// [`Error::QueueClosed`] once shutdown began.
    pub async fn submit(&self, job: Job) -> Result<()> {
        ensure_live(&self.deadline, job.id)?;
        self.shared.ledger.admit()?;

        let Some(queue) = self.job_tx.as_ref() else {
            self.shared.ledger.settle();
            return Err(Error::QueueClosed("job queue already closed".into()));
        };
        send_admitted(queue, job, &self.shared, &self.deadline).await
    }

    /// Build a job from `payload` with the configured defaults and submit it.
    pub async fn submit_payload(&self, payload: i64) -> Result<u64> {
        let job = self.factory.create(payload);
        let id = job.id;
        self.submit(job).await?;
        Ok(id)
    }

    /// A cloneable submitter for other tasks. It does not keep the job queue
    /// open: once the pool shuts down its submissions fail.
    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            jobs: self
                .job_tx
                .as_ref()
                .map(mpsc::Sender::downgrade),
            shared: self.shared.clone(),
            deadline: self.deadline.clone(),
        }
    }

    /// Close every queue in order and wait for all components to exit.
    ///
    /// 1. refuse new submissions and wait for admitted jobs to settle (or
    ///    the deadline);
    /// 2. close the job queue and join the workers, which closes the retry
    ///    channel;
    /// 3. join the retry coordinator, then close the result channel;
    /// 4. join the collector and report.
    pub async fn shutdown(mut self) -> Result<PoolReport> {
        let run_id = self.shared.run_id;
        let mut failure: Option<Error> = None;

        self.advance(PoolPhase::Draining);
        self.shared.ledger.close();
        let drained = self.shared.ledger.wait_drained(&self.deadline).await;
        if !drained {
            warn!(
                %run_id,
                outstanding = self.shared.ledger.outstanding(),
                "Deadline fired before all jobs settled"
            );
        }

        drop(self.job_tx.take());
        self.advance(PoolPhase::JobsClosed);

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(reason) => debug!(%run_id, ?reason, "Worker joined"),
                Err(e) => {
                    error!(%run_id, error = ?e, "Worker task panicked");
                    failure.get_or_insert(Error::Internal(format!("worker task failed: {e}")));
                }
            }
        }
        self.advance(PoolPhase::RetriesClosed);

        if let Some(coordinator) = self.coordinator.take() {
            match coordinator.await {
                Ok(scheduled) => debug!(%run_id, scheduled, "Retry coordinator joined"),
                Err(e) => {
                    error!(%run_id, error = ?e, "Retry coordinator panicked");
                    failure.get_or_insert(Error::Internal(format!(
                        "retry coordinator failed: {e}"
                    )));
                }
            }
        }
        self.advance(PoolPhase::CoordinatorStopped);

        drop(self.result_tx.take());
        self.advance(PoolPhase::ResultsClosed);

        let collected = match self.collector.take() {
            Some(collector) => match collector.await {
                Ok(report) => report,
                Err(e) => {
                    error!(%run_id, error = ?e, "Result collector panicked");
                    failure.get_or_insert(Error::Internal(format!(
                        "result collector failed: {e}"
                    )));
                    CollectorReport::default()
                }
            },
            None => CollectorReport::default(),
        };
        self.advance(PoolPhase::Stopped);

        if let Some(e) = failure {
            return Err(e);
        }

        let report = PoolReport {
            run_id,
            tally: collected.tally,
            results: collected.results,
            stats: self.shared.stats.snapshot(),
            deadline_state: self.deadline.state(),
            drained,
        };

        info!(
            %run_id,
            success = report.tally.success,
            failed = report.tally.failed,
            submitted = report.stats.submitted,
            lost = report.lost(),
            deadline = ?report.deadline_state,
            "Worker pool stopped"
        );
        Ok(report)
    }

    fn advance(&mut self, phase: PoolPhase) {
        debug_assert!(phase > self.phase, "pool phase must move forward");
        info!(run_id = %self.shared.run_id, ?phase, "Pool phase");
        self.phase = phase;
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if self.phase == PoolPhase::Stopped {
            return;
        }
        warn!(
            run_id = %self.shared.run_id,
            phase = ?self.phase,
            outstanding = self.shared.ledger.outstanding(),
            "Pool handle dropped without shutdown, draining in background"
        );
        self.shared.ledger.close();
        drop(self.job_tx.take());
        drop(self.result_tx.take());
        // A dropped JoinSet aborts its tasks; let the workers run to the end.
        self.workers.detach_all();
    }
}

/// Cloneable submission endpoint that does not keep the job queue alive.
#[derive(Clone)]
pub struct JobSubmitter {
    jobs: Option<mpsc::WeakSender<Job>>,
    shared: Arc<PoolShared>,
    deadline: Deadline,
}

impl JobSubmitter {
    /// Enqueue a job. Same failure modes as [`PoolHandle::submit`].
    pub async fn submit(&self, job: Job) -> Result<()> {
        ensure_live(&self.deadline, job.id)?;
        self.shared.ledger.admit()?;

        // Admission keeps the ledger undrained, so the strong sender stays
        // alive unless the run already ended.
        let Some(queue) = self.jobs.as_ref().and_then(mpsc::WeakSender::upgrade) else {
            self.shared.ledger.settle();
            return Err(Error::QueueClosed("job queue already closed".into()));
        };
        send_admitted(&queue, job, &self.shared, &self.deadline).await
    }
}

fn ensure_live(deadline: &Deadline, job_id: u64) -> Result<()> {
    match deadline.state() {
        DeadlineState::Live => Ok(()),
        state => Err(Error::DeadlineExceeded(format!(
            "job {job_id} not submitted, deadline {state:?}"
        ))),
    }
}

/// Send an already admitted job, settling the admission on failure.
async fn send_admitted(
    queue: &mpsc::Sender<Job>,
    job: Job,
    shared: &PoolShared,
    deadline: &Deadline,
) -> Result<()> {
    let job_id = job.id;

    tokio::select! {
        biased;
        _ = deadline.cancelled() => {
            shared.ledger.settle();
            Err(Error::DeadlineExceeded(format!("job {job_id} not submitted")))
        }
        sent = queue.send(job) => match sent {
            Ok(()) => {
                shared.stats.record_submitted();
                debug!(run_id = %shared.run_id, job_id, "Submitted job");
                Ok(())
            }
            Err(_) => {
                shared.ledger.settle();
                Err(Error::QueueClosed(format!("job {job_id} not submitted")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FixedProcessor;
    use std::time::Duration;

    fn config() -> PoolConfig {
        PoolConfig::default()
            .with_workers(2)
            .with_queue_capacity(4)
            .with_backoff_base(Duration::from_millis(10))
    }

    #[test]
    fn test_phase_ordering() {
        assert!(PoolPhase::Running < PoolPhase::Draining);
        assert!(PoolPhase::Draining < PoolPhase::JobsClosed);
        assert!(PoolPhase::JobsClosed < PoolPhase::RetriesClosed);
        assert!(PoolPhase::RetriesClosed < PoolPhase::CoordinatorStopped);
        assert!(PoolPhase::CoordinatorStopped < PoolPhase::ResultsClosed);
        assert!(PoolPhase::ResultsClosed < PoolPhase::Stopped);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let pool = WorkerPool::new(config().with_workers(0), FixedProcessor::succeeding());
        let err = pool.start(Deadline::never()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_shutdown_without_jobs() {
        let handle = WorkerPool::new(config(), FixedProcessor::succeeding())
            .start(Deadline::never())
            .unwrap();
        assert_eq!(handle.phase(), PoolPhase::Running);

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.tally, Tally::default());
        assert!(report.drained);
        assert_eq!(report.deadline_state, DeadlineState::Live);
        assert_eq!(report.lost(), 0);
    }

    #[tokio::test]
    async fn test_submit_payload_uses_factory_defaults() {
        let handle = WorkerPool::new(config().with_max_retries(5), FixedProcessor::succeeding())
            .start(Deadline::never())
            .unwrap();

        let first = handle.submit_payload(3).await.unwrap();
        let second = handle.submit_payload(4).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.tally, Tally::new(2, 0));
        let mut outputs: Vec<_> = report.results.iter().filter_map(|r| r.output).collect();
        outputs.sort_unstable();
        assert_eq!(outputs, vec![6, 8]);
    }

    #[tokio::test]
    async fn test_submitter_fails_after_shutdown() {
        let handle = WorkerPool::new(config(), FixedProcessor::succeeding())
            .start(Deadline::never())
            .unwrap();
        let submitter = handle.submitter();
        let factory = JobFactory::new(0, Duration::from_millis(1));

        submitter.submit(factory.create(1)).await.unwrap();
        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.tally.success, 1);

        let err = submitter.submit(factory.create(2)).await.unwrap_err();
        assert!(matches!(err, Error::QueueClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_deadline_fails() {
        let deadline = Deadline::after(Duration::from_millis(5));
        let handle = WorkerPool::new(config(), FixedProcessor::succeeding())
            .start(deadline.clone())
            .unwrap();

        deadline.cancelled().await;
        let err = handle.submit_payload(1).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(handle.outstanding(), 0);

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.deadline_state, DeadlineState::Expired);
        assert_eq!(report.stats.submitted, 0);
    }

    #[test]
    fn test_report_lost() {
        let report = PoolReport {
            run_id: Uuid::nil(),
            tally: Tally::new(3, 1),
            results: Vec::new(),
            stats: StatsSnapshot {
                submitted: 6,
                ..Default::default()
            },
            deadline_state: DeadlineState::Expired,
            drained: false,
        };
        assert_eq!(report.lost(), 2);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"deadline_state\":\"expired\""));
    }
}
