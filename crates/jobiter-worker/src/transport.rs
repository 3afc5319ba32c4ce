//! Host transport boundary and an in-memory queue implementation.
//!
//! Payloads cross the boundary as JSON text, the way a list-backed queue
//! would store them. A payload whose cursor does not survive JSON is
//! rejected at enqueue time instead of coming back as a different value.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobiter_core::{CursorCodec, CursorError, IterationError, JobId, JobPayload, JsonCodec};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::policy::{Clock, SystemClock};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload cursor is not transportable: {0}")]
    Cursor(#[from] CursorError),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// An unhandled error captured when a run fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub payload: JobPayload,
    /// Error kind, e.g. `CursorError`.
    pub error_class: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(payload: JobPayload, error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            payload,
            error_class: error_class.into(),
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    /// Record for a failed run, classified by error kind.
    pub fn from_error(payload: JobPayload, error: &IterationError) -> Self {
        Self::new(payload, error.kind().as_str(), error.to_string())
    }
}

/// Queue backend the worker pulls from and resubmits to.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn enqueue(&self, payload: &JobPayload) -> Result<(), TransportError>;

    async fn enqueue_delayed(&self, payload: &JobPayload, delay: Duration)
        -> Result<(), TransportError>;

    /// Next payload that is ready to run, if any.
    async fn dequeue(&self) -> Result<Option<JobPayload>, TransportError>;

    async fn record_failure(&self, failure: FailureRecord) -> Result<(), TransportError>;
}

/// Serializable view of a queue, used to persist it across processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending: Vec<JobPayload>,
    pub failures: Vec<FailureRecord>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    delayed: Vec<(Instant, String)>,
    failures: Vec<FailureRecord>,
}

/// FIFO queue held in memory.
#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Queue whose delayed entries become ready against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            clock,
        }
    }

    /// Rebuild a queue from a snapshot. Former delays are dropped.
    pub fn restore(snapshot: QueueSnapshot) -> Result<Self, TransportError> {
        let ready = snapshot
            .pending
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<VecDeque<_>, _>>()?;

        Ok(Self {
            state: Arc::new(Mutex::new(QueueState {
                ready,
                delayed: Vec::new(),
                failures: snapshot.failures,
            })),
            clock: Arc::new(SystemClock),
        })
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, TransportError> {
        let state = self.state.lock().await;
        let pending = state
            .ready
            .iter()
            .chain(state.delayed.iter().map(|(_, json)| json))
            .map(|json| JobPayload::from_json(json))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueueSnapshot {
            pending,
            failures: state.failures.clone(),
        })
    }

    /// Ready plus delayed entries.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Decoded pending payloads, ready first.
    pub async fn pending(&self) -> Result<Vec<JobPayload>, TransportError> {
        Ok(self.snapshot().await?.pending)
    }

    pub async fn failures(&self) -> Vec<FailureRecord> {
        self.state.lock().await.failures.clone()
    }

    /// Remove and return the first pending entry for `job_id`, ready or not.
    pub async fn take(&self, job_id: &JobId) -> Result<Option<JobPayload>, TransportError> {
        let mut state = self.state.lock().await;

        for index in 0..state.ready.len() {
            let payload = JobPayload::from_json(&state.ready[index])?;
            if payload.job_id == *job_id {
                state.ready.remove(index);
                return Ok(Some(payload));
            }
        }
        for index in 0..state.delayed.len() {
            let payload = JobPayload::from_json(&state.delayed[index].1)?;
            if payload.job_id == *job_id {
                state.delayed.remove(index);
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    /// Remove everything that is pending.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.ready.clear();
        state.delayed.clear();
    }

    fn promote_due(state: &mut QueueState, now: Instant) {
        let (due, waiting): (Vec<_>, Vec<_>) =
            state.delayed.drain(..).partition(|(at, _)| *at <= now);
        state.delayed = waiting;
        state.ready.extend(due.into_iter().map(|(_, json)| json));
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryQueue {
    async fn enqueue(&self, payload: &JobPayload) -> Result<(), TransportError> {
        let json = serialize_for_enqueue(payload)?;
        self.state.lock().await.ready.push_back(json);
        debug!(job_id = %payload.job_id, job_class = %payload.job_class, "Enqueued job");
        Ok(())
    }

    async fn enqueue_delayed(
        &self,
        payload: &JobPayload,
        delay: Duration,
    ) -> Result<(), TransportError> {
        let json = serialize_for_enqueue(payload)?;
        let at = self.clock.now() + delay;
        self.state.lock().await.delayed.push((at, json));
        debug!(
            job_id = %payload.job_id,
            delay_ms = delay.as_millis() as u64,
            "Enqueued delayed job"
        );
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobPayload>, TransportError> {
        let mut state = self.state.lock().await;
        Self::promote_due(&mut state, self.clock.now());

        match state.ready.pop_front() {
            Some(json) => Ok(Some(JobPayload::from_json(&json)?)),
            None => Ok(None),
        }
    }

    async fn record_failure(&self, failure: FailureRecord) -> Result<(), TransportError> {
        warn!(
            job_id = %failure.payload.job_id,
            error_class = %failure.error_class,
            message = %failure.message,
            "Recorded job failure"
        );
        self.state.lock().await.failures.push(failure);
        Ok(())
    }
}

fn serialize_for_enqueue(payload: &JobPayload) -> Result<String, TransportError> {
    if let Some(cursor) = &payload.cursor_position {
        JsonCodec.validate(cursor)?;
    }
    let mut stamped = payload.clone();
    stamped.enqueued_at = Some(Utc::now());
    Ok(stamped.to_json()?)
}
