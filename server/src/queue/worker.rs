use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Job, JobQueue, QueueName};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Handler outcomes drive retry classification: transient errors go back
/// through the backoff schedule, permanent ones fail immediately.
#[derive(Debug)]
pub enum WorkerError {
    Permanent(anyhow::Error),
    Transient(anyhow::Error),
}

impl WorkerError {
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), WorkerError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub job_timeout: Duration,
    pub visibility_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout: Duration::from_secs(300),
            // Reservations outlive the job timeout so a live worker never
            // loses a job it is still allowed to run.
            visibility_timeout: Duration::from_secs(330),
        }
    }
}

/// A pool of polling consumers for one queue. Jobs are handed to exactly
/// one consumer via the queue's reservation; handlers must stay idempotent
/// because delivery is at-least-once.
pub struct WorkerPool {
    queue_name: QueueName,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        queue: JobQueue,
        queue_name: QueueName,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.concurrency);
        for worker_index in 0..config.concurrency.max(1) {
            handles.push(tokio::spawn(consume_loop(
                queue.clone(),
                queue_name,
                handler.clone(),
                config.clone(),
                shutdown_rx.clone(),
                worker_index,
            )));
        }
        info!(queue = %queue_name, workers = config.concurrency, "worker pool started");
        Self { queue_name, shutdown_tx, handles }
    }

    /// Signal shutdown and wait for in-flight jobs up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(queue = %self.queue_name, "worker pool drain exceeded grace period");
        } else {
            info!(queue = %self.queue_name, "worker pool drained");
        }
    }
}

async fn consume_loop(
    queue: JobQueue,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
    worker_index: usize,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let job = match queue.reserve(queue_name, config.visibility_timeout).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Idle; wake on shutdown or after the poll interval.
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                continue;
            }
            Err(err) => {
                warn!(queue = %queue_name, worker = worker_index, error = %err, "reserve failed");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        match tokio::time::timeout(config.job_timeout, handler.handle(&job)).await {
            Ok(Ok(())) => {
                if let Err(err) = queue.complete(&job).await {
                    warn!(queue = %queue_name, job_id = %job.id, error = %err, "complete failed");
                }
            }
            Ok(Err(WorkerError::Permanent(err))) => {
                error!(queue = %queue_name, job_id = %job.id, error = %err, "permanent job failure");
                if let Err(err) = queue.fail(&job, true).await {
                    warn!(queue = %queue_name, job_id = %job.id, error = %err, "fail update failed");
                }
            }
            Ok(Err(WorkerError::Transient(err))) => {
                warn!(queue = %queue_name, job_id = %job.id, error = %err, "transient job failure");
                if let Err(err) = queue.fail(&job, false).await {
                    warn!(queue = %queue_name, job_id = %job.id, error = %err, "fail update failed");
                }
            }
            Err(_elapsed) => {
                warn!(queue = %queue_name, job_id = %job.id, "job timed out; releasing reservation");
                if let Err(err) = queue.release(&job).await {
                    warn!(queue = %queue_name, job_id = %job.id, error = %err, "release failed");
                }
            }
        }
    }
}
