use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use courseidx_core::{IndexingJob, JobReport};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::ClaimedJob;
use super::JobQueue;
use crate::QueueError;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Runs claimed jobs. An `Err` counts as a failed attempt.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &IndexingJob) -> Result<JobReport, HandlerError>;
}

/// A running set of queue workers.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop claiming new jobs and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("workers stopped");
    }
}

impl JobQueue {
    /// Spawn `concurrency` worker tasks running `handler`.
    pub fn start_workers(
        self: &Arc<Self>,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkerPool, QueueError> {
        if concurrency == 0 {
            return Err(QueueError::InvalidArgument(
                "worker concurrency must be at least 1".to_string(),
            ));
        }

        let (shutdown, rx) = watch::channel(false);
        let handles = (0..concurrency)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(self),
                    Arc::clone(&handler),
                    rx.clone(),
                ))
            })
            .collect();

        info!(concurrency, "workers started");
        Ok(WorkerPool { shutdown, handles })
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Register for wake-ups before looking, so an enqueue between the
        // claim and the wait is not missed
        let notified = queue.wakeup().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match queue.claim() {
            Ok(Some(claimed)) => {
                run_job(worker, &queue, handler.as_ref(), claimed).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(worker, error = %e, "failed to claim job"),
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(queue.settings().poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(worker, "worker stopped");
}

async fn run_job(worker: usize, queue: &JobQueue, handler: &dyn JobHandler, claimed: ClaimedJob) {
    let job = claimed.job;
    debug!(worker, job_id = %job.id, attempt = claimed.attempt, "running {}", job.describe());

    let outcome = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;

    let result = match outcome {
        Ok(Ok(report)) => queue.complete(&job.id, report),
        Ok(Err(e)) => {
            warn!(worker, job_id = %job.id, error = %e, "job failed");
            queue.fail(&job.id, &e.to_string(), error_trace(e.as_ref()))
        }
        Err(_) => {
            error!(worker, job_id = %job.id, "job handler panicked");
            queue.fail(&job.id, "job handler panicked", None)
        }
    };

    if let Err(e) = result {
        error!(worker, job_id = %job.id, error = %e, "failed to record job outcome");
    }
}

/// The error and its source chain, one cause per line.
fn error_trace(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(format!("{}\ncaused by: {}", err, causes.join("\ncaused by: ")))
    }
}
