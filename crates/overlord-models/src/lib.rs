//! Fleet Overlord Models
//!
//! Persisted entities shared by the job layer, the scheduler and the
//! out-of-band power driver.

pub mod chassis;
pub mod flavor;
pub mod instance;
pub mod job_request;
pub mod message;

pub use chassis::{Chassis, ChassisState, OobCredentials};
pub use flavor::FlavorProvider;
pub use instance::{Instance, InstanceState};
pub use job_request::{JobParams, JobRequest, JobRequestError, JobRequestState};
pub use message::MessageBody;

/// Generate a new opaque entity identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
