//! Worker loop: pulls payloads, runs them, resubmits or records failures.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobiter_core::{BoxError, IterationError, JobId, JobPayload, RunState};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatcher::{QueueDispatcher, ResumeDispatcher, SubmissionHandle};
use crate::job::IterationJob;
use crate::runner::{IterationRunner, RunOutcome};
use crate::shutdown::{ShutdownSignal, ShutdownSource};
use crate::transport::{FailureRecord, Transport, TransportError};

/// Failure class recorded for payloads naming an unregistered job.
pub const UNKNOWN_JOB_CLASS: &str = "UnknownJobClass";

/// Failure class recorded when a checkpointed run cannot be resubmitted.
pub const RESUBMIT_FAILED_CLASS: &str = "TransportError";

/// Worker errors. Job failures are recorded, not returned.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A job with its item type erased, so the registry can hold any job.
#[async_trait]
pub trait PerformJob: Send + Sync {
    async fn perform(
        &self,
        runner: &IterationRunner,
        job_id: &JobId,
        state: &RunState,
    ) -> Result<RunOutcome, IterationError>;
}

#[async_trait]
impl<J: IterationJob> PerformJob for J {
    async fn perform(
        &self,
        runner: &IterationRunner,
        job_id: &JobId,
        state: &RunState,
    ) -> Result<RunOutcome, IterationError> {
        runner.run(self, job_id, state).await
    }
}

type JobFactory = Box<dyn Fn(&[Value]) -> Result<Box<dyn PerformJob>, BoxError> + Send + Sync>;

/// Maps `job_class` names to job constructors.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor building the job from payload arguments.
    pub fn register<J, F>(&mut self, job_class: impl Into<String>, factory: F)
    where
        J: IterationJob + 'static,
        F: Fn(&[Value]) -> Result<J, BoxError> + Send + Sync + 'static,
    {
        self.factories.insert(
            job_class.into(),
            Box::new(
                move |args: &[Value]| -> Result<Box<dyn PerformJob>, BoxError> {
                    Ok(Box::new(factory(args)?))
                },
            ),
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_job<J, F>(mut self, job_class: impl Into<String>, factory: F) -> Self
    where
        J: IterationJob + 'static,
        F: Fn(&[Value]) -> Result<J, BoxError> + Send + Sync + 'static,
    {
        self.register(job_class, factory);
        self
    }

    fn build(&self, payload: &JobPayload) -> Option<Result<Box<dyn PerformJob>, BoxError>> {
        self.factories
            .get(&payload.job_class)
            .map(|factory| factory(&payload.arguments))
    }
}

/// Result of handling one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Finished,
    Resubmitted(SubmissionHandle),
    /// Failure recorded with this error class.
    Failed(String),
}

/// Counters for one `work_off` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkStats {
    pub finished: usize,
    pub resubmitted: usize,
    pub failed: usize,
}

impl WorkStats {
    pub fn total(&self) -> usize {
        self.finished + self.resubmitted + self.failed
    }

    fn record(&mut self, result: &JobResult) {
        match result {
            JobResult::Finished => self.finished += 1,
            JobResult::Resubmitted(_) => self.resubmitted += 1,
            JobResult::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for WorkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} finished, {} resubmitted, {} failed",
            self.finished, self.resubmitted, self.failed
        )
    }
}

/// Pulls payloads from a transport and drives them through the runner.
pub struct Worker<T: Transport> {
    transport: Arc<T>,
    registry: JobRegistry,
    runner: IterationRunner,
    dispatcher: QueueDispatcher<T>,
    shutdown: ShutdownSignal,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        transport: Arc<T>,
        registry: JobRegistry,
        runner: IterationRunner,
        shutdown: ShutdownSignal,
    ) -> Self {
        let dispatcher = QueueDispatcher::new(Arc::clone(&transport))
            .with_retry_backoff(runner.context().config().retry_backoff);
        Self {
            transport,
            registry,
            runner,
            dispatcher,
            shutdown,
        }
    }

    /// Wire OS signals into the shutdown flag when autoconfigure is on.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.runner.context().config().autoconfigure {
            info!("Installing shutdown signal handlers");
            Some(self.shutdown.install_os_handlers())
        } else {
            None
        }
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Process payloads until the queue is drained or shutdown is requested.
    pub async fn work_off(&self) -> Result<WorkStats, WorkerError> {
        let mut stats = WorkStats::default();

        while !self.shutdown.shutdown_requested() {
            let Some(payload) = self.transport.dequeue().await? else {
                break;
            };
            let result = self.perform(payload).await?;
            stats.record(&result);
        }

        info!(%stats, "Worker pass complete");
        Ok(stats)
    }

    /// Run one payload to the end of a single run.
    pub async fn perform(&self, payload: JobPayload) -> Result<JobResult, WorkerError> {
        info!(
            job_id = %payload.job_id,
            job_class = %payload.job_class,
            times_interrupted = payload.times_interrupted,
            "Performing job"
        );

        let job = match self.registry.build(&payload) {
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                let err = IterationError::execution(e);
                return self.fail(payload, &err).await;
            }
            None => {
                warn!(job_class = %payload.job_class, "No job registered for class");
                let message = format!("no job registered as '{}'", payload.job_class);
                self.transport
                    .record_failure(FailureRecord::new(payload, UNKNOWN_JOB_CLASS, message))
                    .await?;
                return Ok(JobResult::Failed(UNKNOWN_JOB_CLASS.to_string()));
            }
        };

        let state = payload.run_state();
        match job.perform(&self.runner, &payload.job_id, &state).await {
            Ok(RunOutcome::Stopped { resubmit, .. }) => {
                match self.dispatcher.resubmit(&payload, resubmit.next.clone()).await {
                    Ok(handle) => Ok(JobResult::Resubmitted(handle)),
                    Err(e) => Err(self.resubmit_failed(&payload, resubmit.next, e).await),
                }
            }
            Ok(RunOutcome::Finished(_)) => Ok(JobResult::Finished),
            Err(e) => self.fail(payload, &e).await,
        }
    }

    /// Keep the checkpoint of a run whose resubmission was refused.
    ///
    /// The failure record carries the payload with the next run state, so
    /// the job can be resubmitted from it once the transport is back.
    async fn resubmit_failed(
        &self,
        payload: &JobPayload,
        next: RunState,
        error: TransportError,
    ) -> WorkerError {
        error!(
            job_id = %payload.job_id,
            job_class = %payload.job_class,
            cursor_position = ?next.cursor_position,
            times_interrupted = next.times_interrupted,
            error = %error,
            "Failed to resubmit checkpointed job"
        );

        let message = format!(
            "resubmission failed: {error}; next run state: cursor_position={}, times_interrupted={}",
            next.cursor_position
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string),
            next.times_interrupted,
        );
        let record = FailureRecord::new(
            payload.resubmission(next),
            RESUBMIT_FAILED_CLASS,
            message,
        );
        if let Err(e) = self.transport.record_failure(record).await {
            error!(job_id = %payload.job_id, error = %e, "Failed to record resubmission failure");
        }
        WorkerError::Transport(error)
    }

    async fn fail(
        &self,
        payload: JobPayload,
        error: &IterationError,
    ) -> Result<JobResult, WorkerError> {
        error!(
            job_id = %payload.job_id,
            job_class = %payload.job_class,
            error_class = %error.kind(),
            retryable = error.is_retryable(),
            error = %error,
            "Job failed"
        );
        let record = FailureRecord::from_error(payload, error);
        let class = record.error_class.clone();
        self.transport.record_failure(record).await?;
        Ok(JobResult::Failed(class))
    }
}
