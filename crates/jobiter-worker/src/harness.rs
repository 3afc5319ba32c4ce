//! Deterministic driver for exercising resumption in a single process.
//!
//! The harness forces a stop after a fixed number of items per run and
//! captures each resubmission in an in-memory queue instead of a real
//! transport. The runner and codec are the real ones.
//!
//! ```rust,no_run
//! use jobiter_core::JobPayload;
//! use jobiter_worker::harness::IterationHarness;
//! # use jobiter_worker::IterationJob;
//! # async fn demo<J: IterationJob>(job: J) -> Result<(), Box<dyn std::error::Error>> {
//! let harness = IterationHarness::new(job);
//! let runs = harness
//!     .run_to_completion(JobPayload::new("MyJob", vec![]), 100)
//!     .await?;
//! println!("finished after {} runs", runs.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use jobiter_core::{IterationError, JobId, JobPayload, JsonCodec, RunState};
use thiserror::Error;
use tracing::debug;

use crate::config::IterationConfig;
use crate::dispatcher::{QueueDispatcher, ResumeDispatcher};
use crate::job::IterationJob;
use crate::policy::{ForcedInterruption, InterruptionContext};
use crate::runner::{IterationRunner, RunOutcome};
use crate::shutdown::ShutdownSignal;
use crate::transport::{InMemoryQueue, TransportError};

/// Harness errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Run number `run` (1-based, counted over the resumption chain) failed.
    #[error("run {run} failed: {source}")]
    Run {
        run: usize,
        #[source]
        source: IterationError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("resubmission of job {0} was not captured")]
    NotCaptured(JobId),

    #[error("job did not finish within {0} runs")]
    TooManyRuns(usize),
}

impl HarnessError {
    /// The iteration error of a failed run, if that is what happened.
    pub fn iteration_error(&self) -> Option<&IterationError> {
        match self {
            Self::Run { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One simulated worker pickup.
#[derive(Debug, Clone)]
pub struct HarnessRun {
    /// Run state the run started with.
    pub entry: RunState,
    pub outcome: RunOutcome,
    /// Payload captured from the dispatcher, if the run stopped.
    pub resubmitted: Option<JobPayload>,
}

/// Drives a job through forced interruptions.
pub struct IterationHarness<J: IterationJob> {
    job: J,
    runner: IterationRunner,
    queue: Arc<InMemoryQueue>,
    dispatcher: QueueDispatcher<InMemoryQueue>,
    interrupt_after: u64,
}

impl<J: IterationJob> IterationHarness<J> {
    /// Harness that stops after every item.
    pub fn new(job: J) -> Self {
        let config = IterationConfig {
            autoconfigure: false,
            ..IterationConfig::default()
        };
        let context =
            InterruptionContext::with_system_clock(Arc::new(ShutdownSignal::new()), config);
        Self::with_runner(job, IterationRunner::new(Arc::new(JsonCodec), context))
    }

    /// Harness around an existing runner (custom codec or clock).
    pub fn with_runner(job: J, runner: IterationRunner) -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        Self {
            job,
            runner,
            dispatcher: QueueDispatcher::new(Arc::clone(&queue)),
            queue,
            interrupt_after: 1,
        }
    }

    /// Stop after `items` items per run instead of one.
    pub fn interrupt_after(mut self, items: u64) -> Self {
        self.interrupt_after = items.max(1);
        self
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    /// Queue holding captured resubmissions.
    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    /// Simulate one pickup of `payload`.
    pub async fn run_once(&self, payload: &JobPayload) -> Result<HarnessRun, HarnessError> {
        let entry = payload.run_state();
        let outcome = self
            .runner
            .run_with_policy(
                &self.job,
                &payload.job_id,
                &entry,
                ForcedInterruption::after(self.interrupt_after),
            )
            .await
            .map_err(|source| HarnessError::Run {
                run: entry.times_interrupted as usize + 1,
                source,
            })?;

        let resubmitted = match outcome.resubmit() {
            Some(resubmit) => Some(self.capture(payload, resubmit.next.clone()).await?),
            None => None,
        };

        Ok(HarnessRun {
            entry,
            outcome,
            resubmitted,
        })
    }

    /// Feed captured resubmissions back until the job finishes.
    pub async fn run_to_completion(
        &self,
        payload: JobPayload,
        max_runs: usize,
    ) -> Result<Vec<HarnessRun>, HarnessError> {
        let mut runs = Vec::new();
        let mut next = Some(payload);

        while let Some(payload) = next.take() {
            if runs.len() == max_runs {
                return Err(HarnessError::TooManyRuns(max_runs));
            }
            let run = self.run_once(&payload).await?;
            next = run.resubmitted.clone();
            runs.push(run);
        }

        debug!(runs = runs.len(), "Harness finished job");
        Ok(runs)
    }

    async fn capture(
        &self,
        payload: &JobPayload,
        next: RunState,
    ) -> Result<JobPayload, HarnessError> {
        self.dispatcher.resubmit(payload, next).await?;
        self.queue
            .take(&payload.job_id)
            .await?
            .ok_or_else(|| HarnessError::NotCaptured(payload.job_id.clone()))
    }
}
