//! Job submission

use std::sync::Arc;
use std::time::Duration;

use overlord_models::{JobParams, JobRequest, MessageBody};
use tracing::info;

use crate::queue::{Queue, QueueError};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum JobClientError {
    #[error("Failed to persist job request: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enqueue job request: {0}")]
    Queue(#[from] QueueError),
}

/// Creates job requests and publishes them to the job queue.
#[derive(Clone)]
pub struct JobClient {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    queue_name: String,
    message_ttl: Duration,
}

impl JobClient {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        queue_name: impl Into<String>,
        message_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            queue_name: queue_name.into(),
            message_ttl,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Persist a PENDING request, then push a message pointing at it.
    ///
    /// The request is saved first, so a message never refers to a request
    /// that was not written. If the push fails the request stays PENDING
    /// with no message; the caller sees the error.
    pub fn submit_job(
        &self,
        job_type: impl Into<String>,
        params: JobParams,
    ) -> Result<JobRequest, JobClientError> {
        let request = JobRequest::new(job_type, params);
        self.store.save_job_request(&request)?;

        self.queue.ensure_queue(&self.queue_name)?;
        let message = self.queue.push_message(
            &self.queue_name,
            MessageBody::new(request.id.clone()).to_value(),
            self.message_ttl,
        )?;

        info!(
            job_request_id = %request.id,
            job_type = %request.job_type,
            message_id = %message.id,
            "job submitted"
        );
        Ok(request)
    }
}
