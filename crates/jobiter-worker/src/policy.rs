//! Interruption policy: decides after each item whether the run must stop.
//!
//! Policies only answer yes or no. They never touch the cursor or the run
//! state, and they are consulted strictly between items.
//!
//! The runner reads the injected [`Clock`] once per item and passes that
//! instant in [`CheckContext::now`]. The shutdown source is sampled at most
//! once per `interruption_check_throttle`, so a shutdown request is observed
//! within one throttle interval plus the duration of one item, and
//! `max_run_duration` is overshot by at most one item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobiter_core::Cursor;
use tracing::debug;

use crate::config::IterationConfig;
use crate::shutdown::ShutdownSource;

/// What a policy sees after an item has been processed.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    /// Items completed in this run, including the current one.
    pub items_processed: u64,
    /// Time since this run started.
    pub elapsed: Duration,
    pub times_interrupted: u32,
    /// Checkpoint cursor of the current item.
    pub cursor: &'a Cursor,
    /// Clock reading taken for this check.
    pub now: Instant,
}

/// Stop decision, checked after each item.
pub trait InterruptionPolicy<I>: Send {
    fn should_stop(&mut self, item: &I, ctx: &CheckContext<'_>) -> bool;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

/// Dependencies injected into the runner in place of process-wide state.
#[derive(Clone)]
pub struct InterruptionContext {
    shutdown: Arc<dyn ShutdownSource>,
    clock: Arc<dyn Clock>,
    config: IterationConfig,
}

impl InterruptionContext {
    pub fn new(
        shutdown: Arc<dyn ShutdownSource>,
        clock: Arc<dyn Clock>,
        config: IterationConfig,
    ) -> Self {
        Self {
            shutdown,
            clock,
            config,
        }
    }

    /// Context using the system clock.
    pub fn with_system_clock(shutdown: Arc<dyn ShutdownSource>, config: IterationConfig) -> Self {
        Self::new(shutdown, Arc::new(SystemClock), config)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> &IterationConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Arc<dyn ShutdownSource> {
        &self.shutdown
    }
}

/// Default policy: throttled shutdown flag, run duration bound, then the
/// caller's predicate. Stops on the first trigger that fires.
pub struct DefaultPolicy<P> {
    shutdown: Arc<dyn ShutdownSource>,
    max_run_duration: Duration,
    throttle: Duration,
    last_sample: Option<Instant>,
    shutdown_seen: bool,
    predicate: P,
}

impl<P> DefaultPolicy<P> {
    pub fn new(context: &InterruptionContext, predicate: P) -> Self {
        Self {
            shutdown: Arc::clone(&context.shutdown),
            max_run_duration: context.config.max_run_duration,
            throttle: context.config.interruption_check_throttle,
            last_sample: None,
            shutdown_seen: false,
            predicate,
        }
    }

    fn shutdown_requested(&mut self, now: Instant) -> bool {
        let due = match self.last_sample {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.throttle,
        };
        if due {
            self.shutdown_seen = self.shutdown.shutdown_requested();
            self.last_sample = Some(now);
        }
        self.shutdown_seen
    }
}

impl<I, P> InterruptionPolicy<I> for DefaultPolicy<P>
where
    P: FnMut(&I, &CheckContext<'_>) -> bool + Send,
{
    fn should_stop(&mut self, item: &I, ctx: &CheckContext<'_>) -> bool {
        if self.shutdown_requested(ctx.now) {
            debug!("Shutdown requested");
            return true;
        }
        if ctx.elapsed >= self.max_run_duration {
            debug!(
                elapsed_ms = ctx.elapsed.as_millis() as u64,
                max_ms = self.max_run_duration.as_millis() as u64,
                "Run duration exceeded"
            );
            return true;
        }
        if (self.predicate)(item, ctx) {
            debug!("Job asked to stop");
            return true;
        }
        false
    }
}

/// Stops after every `every` items of a run, regardless of anything else.
#[derive(Debug, Clone, Copy)]
pub struct ForcedInterruption {
    every: u64,
}

impl ForcedInterruption {
    pub fn after(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl<I> InterruptionPolicy<I> for ForcedInterruption {
    fn should_stop(&mut self, _item: &I, ctx: &CheckContext<'_>) -> bool {
        ctx.items_processed >= self.every
    }
}
