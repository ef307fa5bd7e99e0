//! Result collector: drains the result stream and keeps the tally.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use taskqueue_core::{Deadline, JobResult, Tally};

use crate::pool::PoolShared;

/// What the collector saw before it stopped.
#[derive(Debug, Clone, Default)]
pub struct CollectorReport {
    pub tally: Tally,
    /// Results in arrival order.
    pub results: Vec<JobResult>,
    /// `true` when the collector stopped on the deadline instead of on
    /// channel closure.
    pub cut_short: bool,
}

/// Sole consumer of the result channel.
pub struct ResultCollector {
    results: mpsc::Receiver<JobResult>,
    deadline: Deadline,
    shared: Arc<PoolShared>,
}

impl ResultCollector {
    pub(crate) fn new(
        results: mpsc::Receiver<JobResult>,
        deadline: Deadline,
        shared: Arc<PoolShared>,
    ) -> Self {
        Self {
            results,
            deadline,
            shared,
        }
    }

    /// Drain until the result channel is closed or the deadline fires.
    ///
    /// On deadline the tally accumulated so far is reported; results still in
    /// flight are never counted.
    #[instrument(name = "result_collector", skip_all, fields(run_id = %self.shared.run_id))]
    pub async fn run(mut self) -> CollectorReport {
        let mut report = CollectorReport::default();

        loop {
            tokio::select! {
                biased;
                _ = self.deadline.cancelled() => {
                    report.cut_short = true;
                    break;
                }
                next = self.results.recv() => match next {
                    Some(result) => {
                        debug!(
                            job_id = result.job_id,
                            worker_id = result.worker_id,
                            status = ?result.status,
                            "Collected result"
                        );
                        report.tally.record(&result);
                        report.results.push(result);
                    }
                    None => break,
                }
            }
        }

        let Tally { success, failed } = report.tally;
        if report.cut_short {
            info!(success, failed, "Deadline fired, reporting partial tally");
        } else {
            info!(success, failed, "Result channel closed");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskqueue_core::{Job, JobStatus};

    fn results_for(count: u64, failed_every: u64) -> Vec<JobResult> {
        (1..=count)
            .map(|id| {
                let mut job = Job::new(id, id as i64, 0, Duration::from_millis(1));
                if id % failed_every == 0 {
                    job.record_failure();
                    JobResult::failed(&job, 1, Duration::ZERO)
                } else {
                    JobResult::success(&job, 1, id as i64 * 2, Duration::ZERO)
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_tallies_until_closed() {
        let (shared, _events) = PoolShared::for_tests();
        let (tx, rx) = mpsc::channel(16);
        for result in results_for(6, 3) {
            tx.send(result).await.unwrap();
        }
        drop(tx);

        let report = ResultCollector::new(rx, Deadline::never(), shared).run().await;

        assert_eq!(report.tally, Tally::new(4, 2));
        assert_eq!(report.results.len(), 6);
        assert!(!report.cut_short);
        let failed: Vec<u64> = report
            .results
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
            .map(|r| r.job_id)
            .collect();
        assert_eq!(failed, vec![3, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_partial_tally() {
        let (shared, _events) = PoolShared::for_tests();
        let (tx, rx) = mpsc::channel(16);
        let deadline = Deadline::after(Duration::from_millis(30));
        let collector = tokio::spawn(ResultCollector::new(rx, deadline, shared).run());

        for result in results_for(2, 10) {
            tx.send(result).await.unwrap();
        }

        // Sender stays open: only the deadline can stop the collector.
        let report = collector.await.unwrap();
        assert!(report.cut_short);
        assert_eq!(report.tally, Tally::new(2, 0));
        drop(tx);
    }
}
