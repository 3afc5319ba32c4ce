//! Run state and the job payload a transport carries between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::cursor::Cursor;
use crate::ids::JobId;

/// Minimal data needed to resume iteration exactly.
///
/// A run never mutates the state it was started with; it produces the next
/// one with [`RunState::next`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Cursor of the last checkpoint, absent on first submission.
    pub cursor_position: Option<Cursor>,
    /// Number of times the job has been interrupted and resubmitted.
    pub times_interrupted: u32,
    /// Seconds spent iterating, summed over all runs.
    #[serde(default)]
    pub total_time: f64,
}

impl RunState {
    /// State of a job that has never run.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// State for the resubmission after a checkpoint at `cursor`.
    pub fn next(&self, cursor: Cursor, run_time: Duration) -> Self {
        Self {
            cursor_position: Some(cursor),
            times_interrupted: self.times_interrupted + 1,
            total_time: self.total_time + run_time.as_secs_f64(),
        }
    }

    /// Cursor to resume from. Ignored on the first run.
    pub fn resume_cursor(&self) -> Option<&Cursor> {
        if self.times_interrupted == 0 {
            None
        } else {
            self.cursor_position.as_ref()
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.times_interrupted > 0
    }
}

/// Unit-of-work payload.
///
/// Field order is part of the contract: positional transports serialize in
/// declaration order, so fields are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Name the worker uses to look up the job implementation.
    pub job_class: String,
    pub job_id: JobId,
    pub queue_name: String,
    /// Original invocation arguments, never changed by a resubmission.
    pub arguments: Vec<Value>,
    /// Times the host framework has attempted this payload.
    pub executions: u32,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub cursor_position: Option<Cursor>,
    pub times_interrupted: u32,
    #[serde(default)]
    pub total_time: f64,
}

impl JobPayload {
    /// Default queue name.
    pub const DEFAULT_QUEUE: &'static str = "default";

    /// Create a first-submission payload.
    pub fn new(job_class: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            job_class: job_class.into(),
            job_id: JobId::generate(),
            queue_name: Self::DEFAULT_QUEUE.to_string(),
            arguments,
            executions: 0,
            enqueued_at: None,
            cursor_position: None,
            times_interrupted: 0,
            total_time: 0.0,
        }
    }

    /// Builder method to set the queue.
    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    /// Run state carried by this payload.
    pub fn run_state(&self) -> RunState {
        RunState {
            cursor_position: self.cursor_position.clone(),
            times_interrupted: self.times_interrupted,
            total_time: self.total_time,
        }
    }

    /// Payload for resubmission: same job, same arguments, new run state.
    pub fn resubmission(&self, next: RunState) -> Self {
        Self {
            cursor_position: next.cursor_position,
            times_interrupted: next.times_interrupted,
            total_time: next.total_time,
            enqueued_at: None,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
