//! Pool of workers executing pipeline steps.
//!
//! Each step of a run is a separate job. A worker executes one step under the
//! allocation lock and queues the next one, so steps of different runs
//! interleave freely while the steps of one run stay in chain order.

use std::sync::Arc;

use futures::{StreamExt, stream::FuturesUnordered};
use nese_resources::{AllocationId, TaskGroupId};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{ProvisionerError, Result},
    pipeline::{Pipeline, PipelineRun, RunSummary, StepOutcome},
    task::StepName,
};

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_MAX_PENDING_RUNS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolOptions {
    pub worker_count: usize,
    /// Runs accepted before `submit` waits for one to finish.
    pub max_pending_runs: usize,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_pending_runs: DEFAULT_MAX_PENDING_RUNS,
        }
    }
}

struct Job {
    run: PipelineRun,
    step: StepName,
    done: oneshot::Sender<RunSummary>,
    _permit: OwnedSemaphorePermit,
}

/// Handle used to submit runs to the pool.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
    permits: Arc<Semaphore>,
}

impl JobQueue {
    /// Queue the first step of `run`.
    pub async fn submit(&self, run: PipelineRun) -> Result<RunHandle> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProvisionerError::WorkerPoolClosed)?;

        let (done, receiver) = oneshot::channel();
        let handle = RunHandle {
            allocation: run.allocation_id(),
            group: run.group(),
            receiver,
        };

        self.sender
            .send(Job {
                run,
                step: StepName::ProvisionUser,
                done,
                _permit: permit,
            })
            .map_err(|_| ProvisionerError::WorkerPoolClosed)?;

        Ok(handle)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A run submitted to the pool.
#[derive(Debug)]
pub struct RunHandle {
    allocation: AllocationId,
    group: TaskGroupId,
    receiver: oneshot::Receiver<RunSummary>,
}

impl RunHandle {
    pub fn allocation_id(&self) -> AllocationId {
        self.allocation
    }

    pub fn group(&self) -> TaskGroupId {
        self.group
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunSummary> {
        self.receiver
            .await
            .map_err(|_| ProvisionerError::RunAbandoned {
                allocation: self.allocation,
                group: self.group,
            })
    }
}

#[derive(Clone)]
struct Worker {
    pipeline: Pipeline,
    sender: mpsc::UnboundedSender<Job>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
}

pub struct WorkerPool {
    worker: Worker,
    options: WorkerPoolOptions,
}

/// Create a pool executing the steps of `pipeline` and the queue feeding it.
pub fn worker_pool(pipeline: Pipeline, options: WorkerPoolOptions) -> (JobQueue, WorkerPool) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let queue = JobQueue {
        sender: sender.clone(),
        permits: Arc::new(Semaphore::new(options.max_pending_runs.max(1))),
    };
    let worker = Worker {
        pipeline,
        sender,
        receiver: Arc::new(Mutex::new(receiver)),
    };

    (queue, WorkerPool { worker, options })
}

pub async fn run_worker_pool(pool: WorkerPool, ct: CancellationToken) {
    pool.run(ct).await
}

impl WorkerPool {
    /// Run the workers until `ct` is cancelled.
    ///
    /// A step already executing when `ct` fires runs to completion. Steps
    /// still queued afterwards are not started: their task groups are deleted
    /// and their handles resolve to `RunAbandoned`.
    pub async fn run(self, ct: CancellationToken) {
        let worker_count = self.options.worker_count.max(1);
        let mut workers_fut = FuturesUnordered::new();
        for _ in 0..worker_count {
            workers_fut.push(self.worker.clone().run(ct.clone()));
        }

        while workers_fut.next().await.is_some() {
            if ct.is_cancelled() {
                continue;
            }

            warn!("Worker exited");
            while workers_fut.len() < worker_count {
                workers_fut.push(self.worker.clone().run(ct.clone()));
            }
        }

        self.worker.abandon_queued().await;

        debug!("worker pool stopped");
    }
}

impl Worker {
    async fn run(self, ct: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                _ = ct.cancelled() => return,
                job = async { self.receiver.lock().await.recv().await } => job,
            };

            let Some(job) = job else {
                return;
            };

            self.execute(job).await;
        }
    }

    /// Close the queue and abandon every job left in it.
    async fn abandon_queued(&self) {
        let mut receiver = self.receiver.lock().await;
        receiver.close();

        while let Ok(job) = receiver.try_recv() {
            warn!(group = %job.run.group(), step = %job.step, "worker pool stopped, abandoning run");
            self.pipeline.abandon_run(&job.run).await;
        }
    }

    async fn execute(&self, job: Job) {
        let Job {
            mut run,
            step,
            done,
            _permit,
        } = job;

        match self.pipeline.execute_step(&mut run, step).await {
            StepOutcome::Continue(next) => {
                let job = Job {
                    run,
                    step: next,
                    done,
                    _permit,
                };
                if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
                    warn!(group = %job.run.group(), step = %job.step, "worker pool closed, abandoning run");
                    self.pipeline.abandon_run(&job.run).await;
                }
            }
            StepOutcome::Finished(summary) => {
                self.pipeline.finish_run(&run, &summary).await;
                if done.send(summary).is_err() {
                    debug!(group = %run.group(), "run handle dropped before the run finished");
                }
            }
        }
    }
}
