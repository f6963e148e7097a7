//! Fleet Overlord - bare-metal fleet orchestration engine
//!
//! Drives physical chassis through their provisioning lifecycle by executing
//! queued jobs: a claim-based job queue consumer with retries and crash
//! recovery, an optimistic chassis scheduler, a lease-based lock manager with
//! background renewal, and (in `overlord-power`) an out-of-band power driver
//! that confirms every state change.

pub mod config;
pub mod jobs;
pub mod locks;
pub mod logging;
pub mod mock;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use config::{ConfigError, OverlordConfig};
pub use jobs::{
    register_builtin_jobs, Job, JobClient, JobContext, JobError, JobExecutor, JobOutcome,
    JobRegistry, JobSettings,
};
pub use locks::{LockError, LockGuard, LockManager, LockManagerConfig};
pub use queue::{Queue, QueueError};
pub use scheduler::{InstanceScheduler, Reservation, SchedulerError};
pub use store::{Store, StoreError};
