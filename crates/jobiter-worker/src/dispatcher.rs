//! Resume dispatcher: turns a stopped run into exactly one resubmission.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobiter_core::{JobId, JobPayload, RunState};
use tracing::info;

use crate::transport::{Transport, TransportError};

/// Handle for a submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionHandle {
    pub job_id: JobId,
    pub queue_name: String,
    /// Delay requested from the transport, if any.
    pub delay: Option<Duration>,
}

/// Submits the next run of a job.
#[async_trait]
pub trait ResumeDispatcher: Send + Sync {
    /// Resubmit `original` carrying `next`; every other field is preserved.
    async fn resubmit(
        &self,
        original: &JobPayload,
        next: RunState,
    ) -> Result<SubmissionHandle, TransportError>;
}

/// Dispatcher that hands resubmissions to a [`Transport`].
pub struct QueueDispatcher<T: Transport> {
    transport: Arc<T>,
    retry_backoff: Option<Duration>,
}

impl<T: Transport> QueueDispatcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            retry_backoff: None,
        }
    }

    /// Builder method to delay every resubmission.
    pub fn with_retry_backoff(mut self, backoff: Option<Duration>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

#[async_trait]
impl<T: Transport> ResumeDispatcher for QueueDispatcher<T> {
    async fn resubmit(
        &self,
        original: &JobPayload,
        next: RunState,
    ) -> Result<SubmissionHandle, TransportError> {
        let payload = original.resubmission(next);

        match self.retry_backoff {
            Some(delay) => self.transport.enqueue_delayed(&payload, delay).await?,
            None => self.transport.enqueue(&payload).await?,
        }

        info!(
            job_id = %payload.job_id,
            job_class = %payload.job_class,
            times_interrupted = payload.times_interrupted,
            delay_ms = self.retry_backoff.map(|d| d.as_millis() as u64),
            "Resubmitted job"
        );

        Ok(SubmissionHandle {
            job_id: payload.job_id,
            queue_name: payload.queue_name,
            delay: self.retry_backoff,
        })
    }
}
