//! Iteration runner: the state machine driving one run of a job.
//!
//! ```text
//! Starting -> Running -> Checkpointing -> Stopped (resubmit)
//!                    \                  \-> Failed (cursor error)
//!                     \-> Finished
//! ```
//!
//! The runner pulls one item ahead of the policy check. When the sequence is
//! exhausted the run finishes without consulting the policy, so a job never
//! resubmits just to discover there is nothing left.

use std::sync::Arc;
use std::time::Duration;

use jobiter_core::{Cursor, CursorCodec, IterationError, JobId, RunPhase, RunState};
use tracing::{debug, error, info};

use crate::job::{IterationJob, RunContext};
use crate::policy::{CheckContext, DefaultPolicy, InterruptionContext, InterruptionPolicy};

/// Request to resubmit the job with a new run state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resubmit {
    pub next: RunState,
}

/// What happened during one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub phase: RunPhase,
    pub items_processed: u64,
    pub elapsed: Duration,
    /// Cursor of the last processed item.
    pub last_cursor: Option<Cursor>,
    /// Seconds iterated over the whole resumption chain.
    pub total_time: f64,
}

/// Successful end of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Interrupted at a valid checkpoint. The caller must resubmit.
    Stopped {
        resubmit: Resubmit,
        summary: RunSummary,
    },
    /// Sequence exhausted. Nothing to resubmit.
    Finished(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Stopped { summary, .. } => summary,
            Self::Finished(summary) => summary,
        }
    }

    pub fn resubmit(&self) -> Option<&Resubmit> {
        match self {
            Self::Stopped { resubmit, .. } => Some(resubmit),
            Self::Finished(_) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Drives jobs through a single run each.
#[derive(Clone)]
pub struct IterationRunner {
    codec: Arc<dyn CursorCodec>,
    context: InterruptionContext,
}

impl IterationRunner {
    pub fn new(codec: Arc<dyn CursorCodec>, context: InterruptionContext) -> Self {
        Self { codec, context }
    }

    pub fn context(&self) -> &InterruptionContext {
        &self.context
    }

    pub fn codec(&self) -> &dyn CursorCodec {
        self.codec.as_ref()
    }

    /// Run with the default policy built from the injected context and the
    /// job's own stop predicate.
    pub async fn run<J: IterationJob>(
        &self,
        job: &J,
        job_id: &JobId,
        state: &RunState,
    ) -> Result<RunOutcome, IterationError> {
        let policy = DefaultPolicy::new(&self.context, |item: &J::Item, ctx: &CheckContext<'_>| {
            job.should_stop(item, ctx)
        });
        self.run_with_policy(job, job_id, state, policy).await
    }

    /// Run with an explicit policy.
    pub async fn run_with_policy<J, P>(
        &self,
        job: &J,
        job_id: &JobId,
        state: &RunState,
        mut policy: P,
    ) -> Result<RunOutcome, IterationError>
    where
        J: IterationJob,
        P: InterruptionPolicy<J::Item>,
    {
        let mut phase = RunPhase::Starting;
        let result = self
            .iterate(job, job_id, state, &mut policy, &mut phase)
            .await;

        if let Err(e) = &result {
            advance(job_id, phase, RunPhase::Failed);
            error!(
                job_id = %job_id,
                error_class = %e.kind(),
                times_interrupted = state.times_interrupted,
                error = %e,
                "Run failed"
            );
        }
        result
    }

    async fn iterate<J, P>(
        &self,
        job: &J,
        job_id: &JobId,
        state: &RunState,
        policy: &mut P,
        phase: &mut RunPhase,
    ) -> Result<RunOutcome, IterationError>
    where
        J: IterationJob,
        P: InterruptionPolicy<J::Item>,
    {
        let clock = self.context.clock();
        let started = clock.now();
        let enforce_cursors = self.context.config().enforce_serializable_cursors;

        let mut ctx = RunContext {
            job_id: job_id.clone(),
            times_interrupted: state.times_interrupted,
            resumed_from: state.resume_cursor().cloned(),
            items_processed: 0,
        };

        if state.is_resumed() {
            info!(
                job_id = %job_id,
                cursor_position = ?state.cursor_position,
                times_interrupted = state.times_interrupted,
                "Resuming job"
            );
            job.on_resume(&ctx);
        } else {
            debug!(job_id = %job_id, "Starting job");
            job.on_start(&ctx);
        }

        let mut sequence = job
            .build_sequence(state.resume_cursor())
            .map_err(IterationError::sequence_construction)?;

        *phase = advance(job_id, *phase, RunPhase::Running);
        let mut last_cursor: Option<Cursor> = None;
        let mut pulled = sequence.next();

        while let Some(pair) = pulled {
            let (item, cursor) = pair.map_err(IterationError::execution)?;

            if enforce_cursors {
                self.validate(job_id, &cursor)?;
            }

            job.each_iteration(&item, &ctx)
                .await
                .map_err(IterationError::execution)?;
            ctx.items_processed += 1;

            pulled = sequence.next();
            if pulled.is_none() {
                last_cursor = Some(cursor);
                break;
            }

            let now = clock.now();
            let check = CheckContext {
                items_processed: ctx.items_processed,
                elapsed: now.saturating_duration_since(started),
                times_interrupted: state.times_interrupted,
                cursor: &cursor,
                now,
            };
            if !policy.should_stop(&item, &check) {
                last_cursor = Some(cursor);
                continue;
            }

            *phase = advance(job_id, *phase, RunPhase::Checkpointing);
            self.validate(job_id, &cursor)?;

            let elapsed = clock.now().saturating_duration_since(started);
            let next = state.next(cursor.clone(), elapsed);
            job.on_shutdown(&ctx);
            *phase = advance(job_id, *phase, RunPhase::Stopped);

            info!(
                job_id = %job_id,
                cursor_position = %cursor,
                times_interrupted = next.times_interrupted,
                items_processed = ctx.items_processed,
                "Interrupting and re-enqueueing the job"
            );

            let summary = RunSummary {
                phase: RunPhase::Stopped,
                items_processed: ctx.items_processed,
                elapsed,
                last_cursor: Some(cursor),
                total_time: next.total_time,
            };
            return Ok(RunOutcome::Stopped {
                resubmit: Resubmit { next },
                summary,
            });
        }

        let elapsed = clock.now().saturating_duration_since(started);
        let total_time = state.total_time + elapsed.as_secs_f64();
        job.on_shutdown(&ctx);
        job.on_complete(&ctx);
        *phase = advance(job_id, *phase, RunPhase::Finished);

        info!(
            job_id = %job_id,
            times_interrupted = state.times_interrupted,
            items_processed = ctx.items_processed,
            total_time,
            "Completed iterating"
        );

        Ok(RunOutcome::Finished(RunSummary {
            phase: RunPhase::Finished,
            items_processed: ctx.items_processed,
            elapsed,
            last_cursor,
            total_time,
        }))
    }

    fn validate(&self, job_id: &JobId, cursor: &Cursor) -> Result<(), IterationError> {
        self.codec.validate(cursor).map_err(|e| {
            error!(
                job_id = %job_id,
                cursor_type = cursor.type_name(),
                cursor = %cursor,
                error = %e,
                "Cursor is not serializable, failing the job"
            );
            IterationError::Cursor(e)
        })
    }
}

fn advance(job_id: &JobId, from: RunPhase, to: RunPhase) -> RunPhase {
    debug!(
        job_id = %job_id,
        from = %from,
        to = %to,
        terminal = to.is_terminal(),
        "Run phase transition"
    );
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use jobiter_core::{BoxError, ErrorKind, JsonCodec};

    use crate::config::IterationConfig;
    use crate::job::Sequence;
    use crate::policy::{ForcedInterruption, ManualClock};
    use crate::shutdown::ShutdownSignal;
    use crate::sources;

    struct ListJob {
        items: Vec<u32>,
        processed: Mutex<Vec<u32>>,
        fail_on: Option<u32>,
        stop_on: Option<u32>,
        completed: AtomicUsize,
    }

    impl ListJob {
        fn new(items: Vec<u32>) -> Self {
            Self {
                items,
                processed: Mutex::new(Vec::new()),
                fail_on: None,
                stop_on: None,
                completed: AtomicUsize::new(0),
            }
        }

        fn processed(&self) -> Vec<u32> {
            self.processed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IterationJob for ListJob {
        type Item = u32;

        fn build_sequence(&self, cursor: Option<&Cursor>) -> Result<Sequence<'_, u32>, BoxError> {
            sources::array(self.items.clone(), cursor)
        }

        async fn each_iteration(&self, item: &u32, _ctx: &RunContext) -> Result<(), BoxError> {
            if self.fail_on == Some(*item) {
                return Err(format!("item {item} exploded").into());
            }
            self.processed.lock().unwrap().push(*item);
            Ok(())
        }

        fn should_stop(&self, item: &u32, _ctx: &CheckContext<'_>) -> bool {
            self.stop_on == Some(*item)
        }

        fn on_complete(&self, _ctx: &RunContext) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Emits wall-clock timestamps as cursors.
    struct TimeCursorJob;

    #[async_trait]
    impl IterationJob for TimeCursorJob {
        type Item = u32;

        fn build_sequence(&self, _cursor: Option<&Cursor>) -> Result<Sequence<'_, u32>, BoxError> {
            Ok(Box::new(
                (0u32..3).map(|i| Ok::<_, BoxError>((i, Cursor::from(Utc::now())))),
            ))
        }

        async fn each_iteration(&self, _item: &u32, _ctx: &RunContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn runner_with(config: IterationConfig, shutdown: ShutdownSignal) -> IterationRunner {
        let context =
            InterruptionContext::new(Arc::new(shutdown), Arc::new(ManualClock::new()), config);
        IterationRunner::new(Arc::new(JsonCodec), context)
    }

    fn runner() -> IterationRunner {
        runner_with(IterationConfig::default(), ShutdownSignal::new())
    }

    #[tokio::test]
    async fn test_uninterrupted_run_finishes() {
        let job = ListJob::new(vec![10, 20, 30]);
        let outcome = runner()
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap();

        assert!(outcome.is_finished());
        assert_eq!(outcome.summary().items_processed, 3);
        assert_eq!(outcome.summary().last_cursor, Some(Cursor::from(2)));
        assert_eq!(job.processed(), vec![10, 20, 30]);
        assert_eq!(job.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_stop_checkpoints_current_item() {
        let job = ListJob::new(vec![0, 1, 2]);
        let outcome = runner()
            .run_with_policy(&job, &JobId::new("j"), &RunState::fresh(), ForcedInterruption::after(1))
            .await
            .unwrap();

        let resubmit = outcome.resubmit().unwrap();
        assert_eq!(resubmit.next.cursor_position, Some(Cursor::from(0)));
        assert_eq!(resubmit.next.times_interrupted, 1);
        assert_eq!(job.processed(), vec![0]);
        assert_eq!(job.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_continues_after_cursor() {
        let job = ListJob::new(vec![0, 1, 2, 3]);
        let state = RunState {
            cursor_position: Some(Cursor::from(1)),
            times_interrupted: 1,
            total_time: 0.0,
        };

        let outcome = runner()
            .run(&job, &JobId::new("j"), &state)
            .await
            .unwrap();

        assert!(outcome.is_finished());
        assert_eq!(job.processed(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_empty_sequence_never_consults_policy() {
        struct PanicPolicy;
        impl InterruptionPolicy<u32> for PanicPolicy {
            fn should_stop(&mut self, _item: &u32, _ctx: &CheckContext<'_>) -> bool {
                panic!("policy must not be consulted");
            }
        }

        let job = ListJob::new(vec![]);
        let outcome = runner()
            .run_with_policy(&job, &JobId::new("j"), &RunState::fresh(), PanicPolicy)
            .await
            .unwrap();

        assert!(outcome.is_finished());
        assert_eq!(outcome.summary().items_processed, 0);
        assert_eq!(outcome.summary().last_cursor, None);
    }

    #[tokio::test]
    async fn test_last_item_finishes_even_when_policy_would_stop() {
        let job = ListJob::new(vec![0]);
        let outcome = runner()
            .run_with_policy(&job, &JobId::new("j"), &RunState::fresh(), ForcedInterruption::after(1))
            .await
            .unwrap();

        assert!(outcome.is_finished());
    }

    #[tokio::test]
    async fn test_time_cursor_fails_at_first_checkpoint() {
        let err = runner()
            .run_with_policy(
                &TimeCursorJob,
                &JobId::new("j"),
                &RunState::fresh(),
                ForcedInterruption::after(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CursorError);
    }

    #[tokio::test]
    async fn test_time_cursor_without_checkpoint_finishes() {
        let outcome = runner()
            .run(&TimeCursorJob, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap();
        assert!(outcome.is_finished());
    }

    #[tokio::test]
    async fn test_enforced_cursor_validation_fails_on_first_item() {
        let config = IterationConfig {
            enforce_serializable_cursors: true,
            ..IterationConfig::default()
        };
        let err = runner_with(config, ShutdownSignal::new())
            .run(&TimeCursorJob, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CursorError);
    }

    #[tokio::test]
    async fn test_item_error_propagates_without_checkpoint() {
        let mut job = ListJob::new(vec![0, 1, 2]);
        job.fail_on = Some(1);

        let err = runner()
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        assert!(err.to_string().contains("item 1 exploded"));
        assert_eq!(job.processed(), vec![0]);
    }

    #[tokio::test]
    async fn test_invalid_resume_cursor_is_construction_error() {
        let job = ListJob::new(vec![0, 1]);
        let state = RunState {
            cursor_position: Some(Cursor::from("not-an-index")),
            times_interrupted: 1,
            total_time: 0.0,
        };

        let err = runner()
            .run(&job, &JobId::new("j"), &state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SequenceConstructionError);
    }

    #[tokio::test]
    async fn test_failing_first_pull_is_execution_error() {
        struct BrokenSource;

        #[async_trait]
        impl IterationJob for BrokenSource {
            type Item = u32;

            fn build_sequence(&self, _: Option<&Cursor>) -> Result<Sequence<'_, u32>, BoxError> {
                let pulls: Vec<Result<(u32, Cursor), BoxError>> = vec![Err("connection reset".into())];
                Ok(Box::new(pulls.into_iter()))
            }

            async fn each_iteration(&self, _: &u32, _: &RunContext) -> Result<(), BoxError> {
                Ok(())
            }
        }

        let err = runner()
            .run(&BrokenSource, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
    }

    #[tokio::test]
    async fn test_job_predicate_stops_run() {
        let mut job = ListJob::new(vec![0, 1, 2, 3]);
        job.stop_on = Some(1);

        let outcome = runner()
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap();

        let resubmit = outcome.resubmit().unwrap();
        assert_eq!(resubmit.next.cursor_position, Some(Cursor::from(1)));
        assert_eq!(job.processed(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_after_current_item() {
        let shutdown = ShutdownSignal::new();
        shutdown.request_shutdown();

        let job = ListJob::new(vec![0, 1, 2]);
        let outcome = runner_with(IterationConfig::default(), shutdown)
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap();

        assert_eq!(job.processed(), vec![0]);
        assert_eq!(
            outcome.resubmit().unwrap().next.cursor_position,
            Some(Cursor::from(0))
        );
    }

    #[tokio::test]
    async fn test_finished_state_refinishes_without_items() {
        let job = ListJob::new(vec![0, 1, 2]);
        let terminal = RunState {
            cursor_position: Some(Cursor::from(2)),
            times_interrupted: 2,
            total_time: 1.0,
        };

        for _ in 0..2 {
            let outcome = runner()
                .run(&job, &JobId::new("j"), &terminal)
                .await
                .unwrap();
            assert!(outcome.is_finished());
        }
        assert!(job.processed().is_empty());
    }

    /// Records lifecycle hook calls in order.
    struct HookJob {
        items: Vec<u32>,
        fail_on: Option<u32>,
        hooks: Mutex<Vec<&'static str>>,
    }

    impl HookJob {
        fn new(items: Vec<u32>) -> Self {
            Self {
                items,
                fail_on: None,
                hooks: Mutex::new(Vec::new()),
            }
        }

        fn hooks(&self) -> Vec<&'static str> {
            self.hooks.lock().unwrap().clone()
        }

        fn record(&self, hook: &'static str) {
            self.hooks.lock().unwrap().push(hook);
        }
    }

    #[async_trait]
    impl IterationJob for HookJob {
        type Item = u32;

        fn build_sequence(&self, cursor: Option<&Cursor>) -> Result<Sequence<'_, u32>, BoxError> {
            sources::array(self.items.clone(), cursor)
        }

        async fn each_iteration(&self, item: &u32, _ctx: &RunContext) -> Result<(), BoxError> {
            if self.fail_on == Some(*item) {
                return Err("boom".into());
            }
            self.record("item");
            Ok(())
        }

        fn on_start(&self, _ctx: &RunContext) {
            self.record("start");
        }

        fn on_resume(&self, _ctx: &RunContext) {
            self.record("resume");
        }

        fn on_shutdown(&self, _ctx: &RunContext) {
            self.record("shutdown");
        }

        fn on_complete(&self, _ctx: &RunContext) {
            self.record("complete");
        }
    }

    #[tokio::test]
    async fn test_hooks_on_fresh_finished_run() {
        let job = HookJob::new(vec![0, 1]);
        runner()
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap();

        assert_eq!(job.hooks(), vec!["start", "item", "item", "shutdown", "complete"]);
    }

    #[tokio::test]
    async fn test_hooks_on_resumed_stopped_run() {
        let job = HookJob::new(vec![0, 1, 2, 3]);
        let state = RunState {
            cursor_position: Some(Cursor::from(0)),
            times_interrupted: 1,
            total_time: 0.0,
        };
        let outcome = runner()
            .run_with_policy(&job, &JobId::new("j"), &state, ForcedInterruption::after(1))
            .await
            .unwrap();

        assert!(!outcome.is_finished());
        assert_eq!(job.hooks(), vec!["resume", "item", "shutdown"]);
    }

    #[tokio::test]
    async fn test_hooks_on_failed_run() {
        let mut job = HookJob::new(vec![0, 1, 2]);
        job.fail_on = Some(1);

        runner()
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap_err();

        assert_eq!(job.hooks(), vec!["start", "item"]);
    }

    #[tokio::test]
    async fn test_hooks_on_failed_checkpoint() {
        // Shutdown is raised, so the first checkpoint fails validation.
        struct TimeHookJob(HookJob);

        #[async_trait]
        impl IterationJob for TimeHookJob {
            type Item = u32;

            fn build_sequence(&self, _: Option<&Cursor>) -> Result<Sequence<'_, u32>, BoxError> {
                Ok(Box::new(
                    (0u32..3).map(|i| Ok::<_, BoxError>((i, Cursor::from(Utc::now())))),
                ))
            }

            async fn each_iteration(&self, _: &u32, _: &RunContext) -> Result<(), BoxError> {
                self.0.record("item");
                Ok(())
            }

            fn on_start(&self, ctx: &RunContext) {
                self.0.on_start(ctx);
            }

            fn on_shutdown(&self, ctx: &RunContext) {
                self.0.on_shutdown(ctx);
            }
        }

        let shutdown = ShutdownSignal::new();
        shutdown.request_shutdown();
        let job = TimeHookJob(HookJob::new(vec![]));
        let err = runner_with(IterationConfig::default(), shutdown)
            .run(&job, &JobId::new("j"), &RunState::fresh())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CursorError);
        assert_eq!(job.0.hooks(), vec!["start", "item"]);
    }
}
