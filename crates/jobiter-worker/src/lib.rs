//! Interruptible iteration engine.
//!
//! A job describes a lazy sequence of `(item, cursor)` pairs and the work to
//! do per item. The [`IterationRunner`] processes items until the sequence
//! ends or the interruption policy asks it to stop, in which case the job is
//! resubmitted carrying the last processed cursor. The [`Worker`] pulls
//! payloads from a [`Transport`] and drives them through the runner.

pub mod config;
pub mod dispatcher;
pub mod harness;
pub mod job;
pub mod policy;
pub mod runner;
pub mod shutdown;
pub mod sources;
pub mod transport;
pub mod worker;

pub use config::{ConfigError, IterationConfig};
pub use dispatcher::{QueueDispatcher, ResumeDispatcher, SubmissionHandle};
pub use harness::{HarnessError, HarnessRun, IterationHarness};
pub use job::{IterationJob, RunContext, Sequence};
pub use policy::{
    CheckContext, Clock, DefaultPolicy, ForcedInterruption, InterruptionContext,
    InterruptionPolicy, ManualClock, SystemClock,
};
pub use runner::{IterationRunner, Resubmit, RunOutcome, RunSummary};
pub use shutdown::{ShutdownSignal, ShutdownSource};
pub use transport::{FailureRecord, InMemoryQueue, QueueSnapshot, Transport, TransportError};
pub use worker::{JobRegistry, JobResult, PerformJob, WorkStats, Worker, WorkerError};
