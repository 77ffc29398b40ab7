//! Asynchronous work pipeline.
//!
//! Ships closures (log entry construction and sink writes, mostly) off the
//! request path. Submission always returns before the work runs; a panic
//! inside a task is isolated and logged without taking the pipeline down.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

/// A unit of background work.
pub type Task = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The pipeline has been shut down; no further work is accepted.
    #[error("pipeline is shut down")]
    Cancelled,

    /// The caller's own cancellation handle fired before the work was
    /// accepted.
    #[error("caller cancelled")]
    CallerCancelled,

    /// `submit_with_deadline` saw the deadline pass before the task
    /// finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Shutdown could not drain all submitted tasks within the deadline;
    /// the stragglers were cancelled.
    #[error("drain deadline exceeded")]
    DrainTimeout,
}

/// Background executor contract.
#[async_trait]
pub trait TaskPipeline: Send + Sync {
    /// Accept `task` for background execution. Returns before the task
    /// runs. Ordering across submissions is not guaranteed.
    fn submit(&self, caller: &CancellationToken, task: Task) -> Result<(), PipelineError>;

    /// Accept `task` and wait until it completes or `deadline` passes.
    async fn submit_with_deadline(
        &self,
        caller: &CancellationToken,
        task: Task,
        deadline: Duration,
    ) -> Result<(), PipelineError>;

    /// Stop accepting work, then wait for everything already submitted to
    /// finish. Tasks still running when `deadline` passes are cancelled.
    async fn shutdown(&self, deadline: Duration) -> Result<(), PipelineError>;
}

/// Production pipeline: one tokio task per submission, tracked for drain.
pub struct TokioPipeline {
    gate: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
}

impl TokioPipeline {
    pub fn new() -> Self {
        Self {
            gate: CancellationToken::new(),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

impl Default for TokioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskPipeline for TokioPipeline {
    fn submit(&self, caller: &CancellationToken, task: Task) -> Result<(), PipelineError> {
        if self.gate.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if caller.is_cancelled() {
            return Err(PipelineError::CallerCancelled);
        }

        let abort = self.abort.clone();
        self.tracker.spawn(async move {
            let guarded = std::panic::AssertUnwindSafe(task).catch_unwind();
            tokio::select! {
                _ = abort.cancelled() => {}
                outcome = guarded => {
                    if outcome.is_err() {
                        error!("panic in pipeline task (isolated)");
                    }
                }
            }
        });
        Ok(())
    }

    async fn submit_with_deadline(
        &self,
        caller: &CancellationToken,
        task: Task,
        deadline: Duration,
    ) -> Result<(), PipelineError> {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        self.submit(
            caller,
            Box::pin(async move {
                task.await;
                let _ = done_tx.send(());
            }),
        )?;

        match tokio::time::timeout(deadline, done_rx).await {
            Ok(_) => Ok(()),
            Err(_) => Err(PipelineError::DeadlineExceeded),
        }
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), PipelineError> {
        self.gate.cancel();
        self.tracker.close();

        if tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .is_err()
        {
            self.abort.cancel();
            return Err(PipelineError::DrainTimeout);
        }
        Ok(())
    }
}

/// Deterministic test pipeline: records tasks without running them and
/// executes them synchronously on demand.
#[derive(Default)]
pub struct RecordingPipeline {
    tasks: Mutex<Vec<Task>>,
    shut_down: Mutex<bool>,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks recorded and not yet run
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every recorded task on the calling task, in submission order.
    pub async fn run_all(&self) {
        let tasks: Vec<Task> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.await;
        }
    }
}

#[async_trait]
impl TaskPipeline for RecordingPipeline {
    fn submit(&self, caller: &CancellationToken, task: Task) -> Result<(), PipelineError> {
        if *self.shut_down.lock().unwrap() {
            return Err(PipelineError::Cancelled);
        }
        if caller.is_cancelled() {
            return Err(PipelineError::CallerCancelled);
        }
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }

    async fn submit_with_deadline(
        &self,
        caller: &CancellationToken,
        task: Task,
        _deadline: Duration,
    ) -> Result<(), PipelineError> {
        self.submit(caller, task)
    }

    async fn shutdown(&self, _deadline: Duration) -> Result<(), PipelineError> {
        *self.shut_down.lock().unwrap() = true;
        Ok(())
    }
}
