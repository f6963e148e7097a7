//! Job layer
//!
//! A job request names a job type and carries string parameters. The
//! executor claims queue messages pointing at requests, resolves the type in a
//! [`JobRegistry`] and drives the request through the state machine in
//! [`runner`]:
//!
//! ```text
//! PENDING ──► RUNNING ──► COMPLETED
//!    ▲           │
//!    └── retry ──┤
//!                ▼
//!              FAILED
//! ```
//!
//! Concrete job types only implement [`Job::execute`]; persistence, claim
//! handling and retries live in the runner.

mod chassis;
mod client;
mod executor;
mod instance;
mod retry;
pub mod runner;

pub use chassis::DecommissionChassisJob;
pub use client::{JobClient, JobClientError};
pub use executor::JobExecutor;
pub use instance::{update_instance_pointer, CreateInstanceJob, DeleteInstanceJob};
pub use retry::{ExponentialBackoff, FlatDelay, RetryPolicy};
pub use runner::JobOutcome;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use overlord_models::{JobRequest, JobRequestError};
use overlord_power::{PowerDriver, PowerError};

use crate::locks::{LockError, LockManager};
use crate::providers::{AgentClient, ImageProvider, NetworkProvider, NoopProvider, ProviderError};
use crate::queue::Queue;
use crate::scheduler::{InstanceScheduler, SchedulerError};
use crate::store::{Store, StoreError};

/// Job type names of the built-in jobs
pub const CREATE_INSTANCE: &str = "instances.create";
pub const DELETE_INSTANCE: &str = "instances.delete";
pub const DECOMMISSION_CHASSIS: &str = "chassis.decommission";

/// Result type for job execution steps
pub type JobResult<T> = Result<T, JobError>;

/// Everything a job execution step can fail with. The runner routes any of
/// these to the retry path.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Request(#[from] JobRequestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Power(#[from] PowerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Client(#[from] JobClientError),

    #[error("Chassis {chassis_id} did not reach power state {target}")]
    PowerStateNotReached {
        chassis_id: String,
        target: &'static str,
    },

    #[error("Chassis {chassis_id} did not acknowledge boot device {device}")]
    BootDeviceNotSet { chassis_id: String, device: String },

    #[error("{kind} {id} is {state}, cannot {action}")]
    InvalidState {
        kind: &'static str,
        id: String,
        state: String,
        action: &'static str,
    },

    #[error("{0}")]
    Failed(String),
}

/// Per-type job behaviour.
pub trait Job: Send + Sync {
    /// Registry key, e.g. `instances.create`
    fn job_type(&self) -> &str;

    /// Failure budget; `None` uses the executor-wide default.
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Type-specific domain work. Called once per attempt, so it must be
    /// safe to repeat after a partial earlier attempt.
    fn execute(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()>;

    /// Runs after every save of the request.
    fn after_save(&self, _ctx: &JobContext, _request: &JobRequest) -> JobResult<()> {
        Ok(())
    }
}

/// Explicitly populated map from job type to implementation.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under its own type name, replacing any previous entry.
    pub fn register(&mut self, job: impl Job + 'static) -> &mut Self {
        self.jobs.insert(job.job_type().to_string(), Arc::new(job));
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.jobs.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Register the instance and chassis lifecycle jobs.
pub fn register_builtin_jobs(registry: &mut JobRegistry) {
    registry
        .register(CreateInstanceJob)
        .register(DeleteInstanceJob)
        .register(DecommissionChassisJob);
}

/// Executor-wide job settings
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub queue_name: String,
    pub poll_interval: Duration,
    pub claim_ttl: Duration,
    pub claim_grace: Duration,
    pub message_ttl: Duration,
    pub max_retries: u32,
    /// TTL of the per-instance pointer lock
    pub lock_ttl: Duration,
    pub retry_policy: Arc<dyn RetryPolicy>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            queue_name: "overlord_jobs".to_string(),
            poll_interval: Duration::from_millis(500),
            claim_ttl: Duration::from_secs(60),
            claim_grace: Duration::from_secs(12 * 3600),
            message_ttl: Duration::from_secs(14 * 24 * 3600),
            max_retries: 10,
            lock_ttl: Duration::from_secs(30),
            retry_policy: Arc::new(FlatDelay::default()),
        }
    }
}

/// Collaborators handed to every job.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub locks: Arc<LockManager>,
    pub power: PowerDriver,
    pub scheduler: InstanceScheduler,
    pub images: Arc<dyn ImageProvider>,
    pub network: Arc<dyn NetworkProvider>,
    pub agent: Arc<dyn AgentClient>,
    pub client: JobClient,
    pub settings: JobSettings,
}

impl JobContext {
    /// Context with no-op providers; swap them in with the `with_*` methods.
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        locks: Arc<LockManager>,
        power: PowerDriver,
        settings: JobSettings,
    ) -> Self {
        let noop = Arc::new(NoopProvider);
        Self {
            scheduler: InstanceScheduler::new(store.clone()),
            client: JobClient::new(
                store.clone(),
                queue.clone(),
                settings.queue_name.clone(),
                settings.message_ttl,
            ),
            store,
            queue,
            locks,
            power,
            images: noop.clone(),
            network: noop.clone(),
            agent: noop,
            settings,
        }
    }

    pub fn with_images(mut self, images: Arc<dyn ImageProvider>) -> Self {
        self.images = images;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkProvider>) -> Self {
        self.network = network;
        self
    }

    pub fn with_agent(mut self, agent: Arc<dyn AgentClient>) -> Self {
        self.agent = agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Job for Named {
        fn job_type(&self) -> &str {
            self.0
        }

        fn execute(&self, _ctx: &JobContext, _request: &JobRequest) -> JobResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_registration() {
        let mut registry = JobRegistry::new();
        register_builtin_jobs(&mut registry);
        assert_eq!(
            registry.job_types(),
            vec![DECOMMISSION_CHASSIS, CREATE_INSTANCE, DELETE_INSTANCE]
        );
        assert!(registry.get("instances.resize").is_none());
    }

    #[test]
    fn test_register_replaces_same_type() {
        let mut registry = JobRegistry::new();
        registry.register(Named("a")).register(Named("a")).register(Named("b"));
        assert_eq!(registry.job_types().len(), 2);
        assert!(registry.contains("b"));
        assert_eq!(registry.get("a").unwrap().max_retries(), None);
    }

    #[test]
    fn test_job_error_messages() {
        let err = JobError::PowerStateNotReached {
            chassis_id: "c1".to_string(),
            target: "on",
        };
        assert_eq!(err.to_string(), "Chassis c1 did not reach power state on");
    }
}
