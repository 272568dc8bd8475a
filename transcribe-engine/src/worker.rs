//! Single-worker job queue: `POST /transcribe` enqueues; one
//! background task pulls and runs jobs strictly one at a time per
//! process. This is what keeps "the orchestrator processes one job at
//! a time per worker process" true even though submission itself is
//! driven by however many concurrent HTTP requests arrive.

use std::sync::Arc;
use tokio::sync::mpsc;
use transcribe_common::model::{JobId, Source};

use crate::pipeline::orchestrator::{self, OrchestratorDeps};

const QUEUE_CAPACITY: usize = 256;

struct QueuedJob {
    job_id: JobId,
    source: Source,
}

/// Handle used by HTTP handlers to feed the single worker loop.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Enqueues a job for the worker loop to pick up in submission
    /// order. Fails only if the worker task has stopped.
    pub async fn enqueue(&self, job_id: JobId, source: Source) -> Result<(), JobQueueClosed> {
        self.sender
            .send(QueuedJob { job_id, source })
            .await
            .map_err(|_| JobQueueClosed)
    }

    /// Jobs submitted but not yet picked up by the worker loop. Does
    /// not count the job currently being processed, which has already
    /// been received off the channel by the time it runs.
    pub fn depth(&self) -> usize {
        QUEUE_CAPACITY - self.sender.capacity()
    }
}

#[derive(Debug)]
pub struct JobQueueClosed;

impl std::fmt::Display for JobQueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("worker loop is no longer accepting jobs")
    }
}

impl std::error::Error for JobQueueClosed {}

/// Spawns the single worker task and returns the queue handle the HTTP
/// layer enqueues onto. Jobs run strictly sequentially: the next job is
/// not received off the channel until `orchestrator::run_job` returns
/// for the current one.
pub fn spawn(deps: Arc<OrchestratorDeps>) -> JobQueue {
    let (sender, mut receiver) = mpsc::channel::<QueuedJob>(QUEUE_CAPACITY);
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            orchestrator::run_job(deps.clone(), job.job_id, job.source).await;
        }
    });
    JobQueue { sender }
}
