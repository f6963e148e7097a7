//! Job request state machine
//!
//! Drives one claimed request to its next resting point:
//!
//! - PENDING: start it (→ RUNNING, save, refresh the claim), run the job's
//!   execution step, then complete or reset
//! - RUNNING at pickup: a previous worker died mid-attempt; reset without
//!   re-running the execution step
//! - COMPLETED / FAILED: delete the stale message
//!
//! Reset increments `failed_attempts` and either gives up (FAILED, message
//! deleted) or parks the request until the retry policy's delay passes by
//! extending the claim instead of deleting the message.
//!
//! Bookkeeping failures (save, claim update, delete) are logged and never
//! escape. A request left inconsistent that way is picked up again when the
//! claim lapses.

use chrono::Utc;
use overlord_models::{JobRequest, JobRequestState};
use tracing::{debug, error, info, warn};

use super::{Job, JobContext};
use crate::queue::ClaimedMessage;

/// Where a request ended up after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed this attempt, message parked until the retry delay passes
    Retrying {
        failed_attempts: u32,
    },
    /// Retry budget exhausted
    Failed {
        failed_attempts: u32,
    },
    /// Picked up before `next_attempt_at`; claim pushed out, nothing run
    Deferred,
    /// Request was already terminal; message dropped
    AlreadyTerminal(JobRequestState),
    /// No registered job type; request failed permanently
    UnknownJobType,
}

/// Run one pass of the state machine for `request` under `message`.
pub fn execute(
    ctx: &JobContext,
    job: &dyn Job,
    mut request: JobRequest,
    message: &ClaimedMessage,
) -> JobOutcome {
    match request.state {
        JobRequestState::Completed | JobRequestState::Failed => {
            info!(
                job_request_id = %request.id,
                state = %request.state,
                "request already terminal, dropping message"
            );
            delete_message(ctx, message);
            JobOutcome::AlreadyTerminal(request.state)
        }
        JobRequestState::Running => {
            warn!(
                job_request_id = %request.id,
                job_type = %request.job_type,
                failed_attempts = request.failed_attempts,
                "request found RUNNING at pickup, previous attempt was abandoned"
            );
            reset(ctx, job, &mut request, message)
        }
        JobRequestState::Pending => {
            if let Some(remaining) = remaining_delay(&request) {
                debug!(
                    job_request_id = %request.id,
                    remaining_ms = remaining.as_millis() as u64,
                    "request not yet eligible, extending claim"
                );
                update_claim(ctx, message, remaining);
                return JobOutcome::Deferred;
            }
            run_attempt(ctx, job, request, message)
        }
    }
}

/// Fail a request whose job type has no implementation.
pub fn fail_unknown(ctx: &JobContext, mut request: JobRequest, message: &ClaimedMessage) -> JobOutcome {
    if request.is_terminal() {
        delete_message(ctx, message);
        return JobOutcome::AlreadyTerminal(request.state);
    }

    error!(
        job_request_id = %request.id,
        job_type = %request.job_type,
        "no job registered for type, failing request"
    );
    match request.fail() {
        Ok(()) => {
            if let Err(e) = ctx.store.save_job_request(&request) {
                error!(job_request_id = %request.id, error = %e, "failed to save request");
            }
        }
        Err(e) => error!(job_request_id = %request.id, error = %e, "cannot fail request"),
    }
    delete_message(ctx, message);
    JobOutcome::UnknownJobType
}

fn run_attempt(
    ctx: &JobContext,
    job: &dyn Job,
    mut request: JobRequest,
    message: &ClaimedMessage,
) -> JobOutcome {
    if let Err(e) = request.start() {
        error!(job_request_id = %request.id, error = %e, "cannot start request");
        return reset(ctx, job, &mut request, message);
    }
    save_request(ctx, job, &request);
    update_claim(ctx, message, ctx.settings.claim_ttl);

    info!(
        job_request_id = %request.id,
        job_type = %request.job_type,
        attempt = request.failed_attempts + 1,
        "running job"
    );

    match job.execute(ctx, &request) {
        Ok(()) => complete(ctx, job, &mut request, message),
        Err(e) => {
            warn!(
                job_request_id = %request.id,
                job_type = %request.job_type,
                error = %e,
                "job attempt failed"
            );
            reset(ctx, job, &mut request, message)
        }
    }
}

fn complete(
    ctx: &JobContext,
    job: &dyn Job,
    request: &mut JobRequest,
    message: &ClaimedMessage,
) -> JobOutcome {
    if let Err(e) = request.complete() {
        error!(job_request_id = %request.id, error = %e, "cannot complete request");
        return reset(ctx, job, request, message);
    }
    save_request(ctx, job, request);
    delete_message(ctx, message);
    info!(job_request_id = %request.id, job_type = %request.job_type, "job completed");
    JobOutcome::Completed
}

fn reset(
    ctx: &JobContext,
    job: &dyn Job,
    request: &mut JobRequest,
    message: &ClaimedMessage,
) -> JobOutcome {
    let max_retries = job.max_retries().unwrap_or(ctx.settings.max_retries);
    let delay = ctx
        .settings
        .retry_policy
        .delay(request.failed_attempts.saturating_add(1));
    let next_attempt_at = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    let state = match request.record_failure(max_retries, next_attempt_at) {
        Ok(state) => state,
        Err(e) => {
            // Only reachable for a request that was never started; the
            // message is left for claim expiry.
            error!(job_request_id = %request.id, error = %e, "cannot reset request");
            return JobOutcome::Retrying {
                failed_attempts: request.failed_attempts,
            };
        }
    };
    save_request(ctx, job, request);

    if state == JobRequestState::Failed {
        error!(
            job_request_id = %request.id,
            job_type = %request.job_type,
            failed_attempts = request.failed_attempts,
            max_retries,
            "job failed permanently"
        );
        delete_message(ctx, message);
        return JobOutcome::Failed {
            failed_attempts: request.failed_attempts,
        };
    }

    info!(
        job_request_id = %request.id,
        failed_attempts = request.failed_attempts,
        retry_in_ms = delay.as_millis() as u64,
        "job will be retried"
    );
    update_claim(ctx, message, delay);
    JobOutcome::Retrying {
        failed_attempts: request.failed_attempts,
    }
}

fn remaining_delay(request: &JobRequest) -> Option<std::time::Duration> {
    let at = request.next_attempt_at?;
    (at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

fn save_request(ctx: &JobContext, job: &dyn Job, request: &JobRequest) {
    if let Err(e) = ctx.store.save_job_request(request) {
        error!(job_request_id = %request.id, error = %e, "failed to save request");
        return;
    }
    if let Err(e) = job.after_save(ctx, request) {
        error!(job_request_id = %request.id, error = %e, "post-save hook failed");
    }
}

fn update_claim(ctx: &JobContext, message: &ClaimedMessage, ttl: std::time::Duration) {
    if let Err(e) = ctx.queue.update_claim(message, ttl) {
        error!(message_id = %message.message_id, error = %e, "failed to update claim");
    }
}

fn delete_message(ctx: &JobContext, message: &ClaimedMessage) {
    if let Err(e) = ctx.queue.delete_message(message) {
        error!(message_id = %message.message_id, error = %e, "failed to delete message");
    }
}
