//! Worker pool consuming the job queue
//!
//! Each worker loops claim → resolve → dispatch until stopped. Claiming is
//! serialized through one process-wide mutex so no two workers of this
//! process ever hold a claim on the same message; execution runs outside it.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use overlord_models::MessageBody;
use tracing::{debug, error, info, warn};

use super::runner::{self, JobOutcome};
use super::{JobContext, JobRegistry};
use crate::queue::ClaimedMessage;

struct ExecutorInner {
    ctx: JobContext,
    registry: JobRegistry,
    /// Held for the whole claim attempt, including the empty-queue wait
    claim_mutex: Mutex<()>,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

/// Fixed-size pool of job workers. Cloning shares the pool, so a clone can
/// `stop()` a pool blocked in `run()` on another thread.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<ExecutorInner>,
}

impl JobExecutor {
    pub fn new(ctx: JobContext, registry: JobRegistry) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                ctx,
                registry,
                claim_mutex: Mutex::new(()),
                stopped: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.inner.ctx
    }

    /// Start `worker_count` workers and block until all of them exit.
    pub fn run(&self, worker_count: usize) -> io::Result<()> {
        info!(
            workers = worker_count,
            queue = %self.inner.ctx.settings.queue_name,
            job_types = ?self.inner.registry.job_types(),
            "job executor starting"
        );

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let executor = self.clone();
            let spawned = thread::Builder::new()
                .name(format!("job-worker-{worker_id}"))
                .spawn(move || executor.worker_loop(worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Let already started workers drain before reporting
                    self.stop();
                    join_all(handles);
                    return Err(e);
                }
            }
        }

        join_all(handles);
        info!("job executor stopped");
        Ok(())
    }

    /// Ask every worker to exit after its current iteration. In-flight jobs
    /// are not interrupted.
    pub fn stop(&self) {
        let mut stopped = self.stopped();
        if !*stopped {
            info!("job executor stop requested");
        }
        *stopped = true;
        self.inner.stop_signal.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped()
    }

    /// One worker iteration: claim at most one message and process it.
    /// Returns `None` when nothing was claimed.
    pub fn process_next(&self) -> Option<JobOutcome> {
        let message = self.claim_next()?;
        self.dispatch(&message)
    }

    fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "worker started");
        while !self.is_stopped() {
            if let Some(outcome) = self.process_next() {
                debug!(worker_id, ?outcome, "worker iteration finished");
            }
        }
        debug!(worker_id, "worker exited");
    }

    fn claim_next(&self) -> Option<ClaimedMessage> {
        let ctx = &self.inner.ctx;
        let settings = &ctx.settings;

        let _claim_guard = self
            .inner
            .claim_mutex
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.is_stopped() {
            return None;
        }

        match ctx
            .queue
            .claim_message(&settings.queue_name, settings.claim_ttl, settings.claim_grace)
        {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                self.wait_for_stop(settings.poll_interval);
                None
            }
            Err(e) => {
                // No backoff beyond the regular poll interval
                error!(queue = %settings.queue_name, error = %e, "failed to claim message");
                self.wait_for_stop(settings.poll_interval);
                None
            }
        }
    }

    fn dispatch(&self, message: &ClaimedMessage) -> Option<JobOutcome> {
        let ctx = &self.inner.ctx;

        let body = match MessageBody::from_value(&message.body) {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "malformed job message, dropping");
                delete_quietly(ctx, message);
                return None;
            }
        };

        let request = match ctx.store.get_job_request(&body.job_request_id) {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                info!(
                    job_request_id = %body.job_request_id,
                    "job request no longer exists, dropping message"
                );
                delete_quietly(ctx, message);
                return None;
            }
            Err(e) => {
                // Claim lapses and another pass retries the lookup
                error!(job_request_id = %body.job_request_id, error = %e, "failed to load job request");
                return None;
            }
        };

        let outcome = match self.inner.registry.get(&request.job_type) {
            Some(job) => runner::execute(ctx, job.as_ref(), request, message),
            None => runner::fail_unknown(ctx, request, message),
        };
        Some(outcome)
    }

    fn stopped(&self) -> MutexGuard<'_, bool> {
        self.inner.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_for_stop(&self, timeout: Duration) {
        let stopped = self.stopped();
        let _ = self
            .inner
            .stop_signal
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
    }
}

fn delete_quietly(ctx: &JobContext, message: &ClaimedMessage) {
    if let Err(e) = ctx.queue.delete_message(message) {
        error!(message_id = %message.message_id, error = %e, "failed to delete message");
    }
}

fn join_all(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            error!("job worker panicked");
        }
    }
}
