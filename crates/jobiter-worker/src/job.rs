//! The capability set a job implements to be driven by the runner.

use async_trait::async_trait;
use jobiter_core::{BoxError, Cursor, JobId};

use crate::policy::CheckContext;

/// Lazy, restartable sequence of `(item, checkpoint_cursor)` pairs.
///
/// A pull may fail; that failure ends the run as an execution error.
pub type Sequence<'a, T> = Box<dyn Iterator<Item = Result<(T, Cursor), BoxError>> + Send + 'a>;

/// Context handed to per-item work and lifecycle callbacks.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: JobId,
    pub times_interrupted: u32,
    /// Cursor this run resumed from, if any.
    pub resumed_from: Option<Cursor>,
    /// Items completed so far in this run.
    pub items_processed: u64,
}

/// A job split into checkpointable steps.
///
/// `build_sequence(Some(c))` must yield exactly what an uninterrupted pass
/// would have yielded after the item whose cursor was `c`.
#[async_trait]
pub trait IterationJob: Send + Sync {
    type Item: Send + Sync;

    /// Build the remaining sequence, starting after `cursor`.
    fn build_sequence(&self, cursor: Option<&Cursor>) -> Result<Sequence<'_, Self::Item>, BoxError>;

    /// Process one item.
    async fn each_iteration(&self, item: &Self::Item, ctx: &RunContext) -> Result<(), BoxError>;

    /// Domain-specific early stop, checked after each item.
    fn should_stop(&self, _item: &Self::Item, _ctx: &CheckContext<'_>) -> bool {
        false
    }

    /// Called once, on the very first run of the job.
    fn on_start(&self, _ctx: &RunContext) {}

    /// Called at the start of every resumed run.
    fn on_resume(&self, _ctx: &RunContext) {}

    /// Called when a run ends without error, whether it stopped or
    /// finished. Runs before [`on_complete`](Self::on_complete).
    fn on_shutdown(&self, _ctx: &RunContext) {}

    /// Called once the sequence is exhausted.
    ///
    /// A failed run calls neither this nor `on_shutdown`.
    fn on_complete(&self, _ctx: &RunContext) {}
}
