use std::sync::Arc;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};
use tracing::{error, info};

use super::{Job, JobDispatcher, Worker};
use crate::error::{DataError, Result};

/// A job together with the queue it was submitted to.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub queue: String,
    pub job: Job,
}

/// Dispatcher feeding a tokio channel. Submitting never blocks, so it can be
/// called from the synchronous engine inside or outside the runtime.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl ChannelDispatcher {
    /// Dispatcher plus the receiving end for [`spawn_workers`]. The channel
    /// closes once every clone of the dispatcher is dropped.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobDispatcher for ChannelDispatcher {
    fn submit(&self, job: Job, queue: &str) -> Result<()> {
        self.tx
            .send(QueuedJob {
                queue: queue.to_string(),
                job,
            })
            .map_err(|_| DataError::Queue(format!("queue {queue:?} is closed")))
    }
}

/// Totals over every job a worker pool ran.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    pub failed: usize,
    pub processed_rows: u64,
    pub error_count: u64,
}

/// Run jobs from `rx` on the blocking pool, at most `concurrency` at a time.
/// Resolves once the channel is closed and every job has finished.
pub fn spawn_workers(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    worker: Arc<Worker>,
    concurrency: usize,
) -> JoinHandle<WorkerReport> {
    tokio::spawn(async move {
        let sem = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::new();

        while let Some(QueuedJob { queue, job }) = rx.recv().await {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            // engine calls are synchronous file work
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                info!(queue = %queue, contract = %job.contract, work = job.work.kind(), "picked up job");
                worker.run(job)
            }));
        }

        let mut report = WorkerReport::default();
        for h in handles {
            match h.await {
                Ok(Ok(stats)) => {
                    report.completed += 1;
                    report.processed_rows += stats.processed_rows;
                    report.error_count += stats.error_count;
                }
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "worker task panicked");
                    report.failed += 1;
                }
            }
        }
        info!(
            completed = report.completed,
            failed = report.failed,
            processed = report.processed_rows,
            "worker pool drained"
        );
        report
    })
}
