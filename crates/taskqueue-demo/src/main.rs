//! taskqueue demo: push a batch of jobs through a simulated worker pool and
//! report the tally.
//!
//! Pool settings come from `TASKQUEUE_*` environment variables (see
//! [`PoolConfig::from_env`]); `TASKQUEUE_JOBS` sets the number of jobs.
//! Ctrl-C aborts the run early through the same path as the deadline.

mod logging;

use std::time::Instant;

use anyhow::Context;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{info, warn};

use taskqueue_jobs::{defaults, Deadline, Error, PoolConfig, PoolEvent, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let _log_guard = logging::init_tracing();

    let started = Instant::now();
    let config = PoolConfig::from_env();
    config.validate().context("invalid pool configuration")?;
    let job_count = std::env::var("TASKQUEUE_JOBS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(defaults::DEMO_JOB_COUNT);

    info!(
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        max_retries = config.default_max_retries,
        backoff_ms = config.backoff_base.as_millis() as u64,
        deadline_secs = config.deadline.as_secs(),
        failure_probability = config.failure_probability,
        jobs = job_count,
        "Starting demo run"
    );

    let pool = WorkerPool::simulated(config.clone());
    let mirror = tokio::spawn(telemetry_mirror(pool.events()));

    let deadline = Deadline::after(config.deadline);
    let interrupt = tokio::spawn({
        let deadline = deadline.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                deadline.cancel();
            }
        }
    });

    let handle = pool.start(deadline).context("failed to start worker pool")?;

    for _ in 0..job_count {
        let payload = rand::thread_rng().gen_range(0..defaults::DEMO_PAYLOAD_MAX);
        match handle.submit_payload(payload).await {
            Ok(_) => {}
            Err(Error::DeadlineExceeded(reason)) => {
                warn!(%reason, "Run ended before all jobs were submitted");
                break;
            }
            Err(e) => return Err(e).context("failed to submit job"),
        }
    }

    let report = handle.shutdown().await.context("worker pool shutdown failed")?;
    interrupt.abort();
    // The event stream closes once the pool is gone.
    let _ = mirror.await;

    info!(
        run_id = %report.run_id,
        success = report.tally.success,
        failed = report.tally.failed,
        lost = report.lost(),
        deadline = ?report.deadline_state,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "All jobs processed"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Structured log line for every pool event.
async fn telemetry_mirror(mut rx: broadcast::Receiver<PoolEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event {
                PoolEvent::JobCompleted {
                    job_id,
                    worker_id,
                    output,
                } => {
                    info!(
                        target: "taskqueue::events",
                        event = "job.completed",
                        job_id, worker_id, output,
                        "Job done"
                    );
                }
                PoolEvent::JobFailed {
                    job_id,
                    worker_id,
                    retry_count,
                } => {
                    warn!(
                        target: "taskqueue::events",
                        event = "job.failed",
                        job_id, worker_id, retry_count,
                        "Job permanently failed"
                    );
                }
                PoolEvent::RetryScheduled {
                    job_id,
                    retry_count,
                    delay,
                } => {
                    info!(
                        target: "taskqueue::events",
                        event = "retry.scheduled",
                        job_id, retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Retry scheduled"
                    );
                }
                PoolEvent::WorkerStopped { worker_id, reason } => {
                    info!(
                        target: "taskqueue::events",
                        event = "worker.stopped",
                        worker_id, ?reason,
                        "Worker stopped"
                    );
                }
                _ => {}
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "Telemetry mirror lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
