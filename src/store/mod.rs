//! Entity repository
//!
//! Point lookups, filtered listing and atomic batched writes for job
//! requests, chassis, instances and flavor providers. A batch may carry
//! compare-and-swap preconditions; a batch whose preconditions do not hold
//! applies nothing and fails with `StoreError::Conflict`.

mod memory;

pub use memory::MemoryStore;

use overlord_models::{Chassis, ChassisState, FlavorProvider, Instance, JobRequest};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Chassis listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ChassisFilter {
    pub state: Option<ChassisState>,
    pub chassis_model_id: Option<String>,
}

impl ChassisFilter {
    pub fn ready_for_model(chassis_model_id: impl Into<String>) -> Self {
        Self {
            state: Some(ChassisState::Ready),
            chassis_model_id: Some(chassis_model_id.into()),
        }
    }

    pub fn matches(&self, chassis: &Chassis) -> bool {
        self.state.map_or(true, |s| chassis.state == s)
            && self
                .chassis_model_id
                .as_deref()
                .map_or(true, |m| chassis.chassis_model_id == m)
    }
}

/// A row write inside a batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    PutChassis(Chassis),
    PutInstance(Instance),
}

/// A condition checked atomically with the batch
#[derive(Debug, Clone)]
pub enum Precondition {
    ChassisState {
        chassis_id: String,
        state: ChassisState,
    },
}

/// Multi-row write applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only apply if the stored chassis is still in `state`.
    pub fn expect_chassis_state(mut self, chassis_id: impl Into<String>, state: ChassisState) -> Self {
        self.preconditions.push(Precondition::ChassisState {
            chassis_id: chassis_id.into(),
            state,
        });
        self
    }

    pub fn put_chassis(mut self, chassis: Chassis) -> Self {
        self.ops.push(BatchOp::PutChassis(chassis));
        self
    }

    pub fn put_instance(mut self, instance: Instance) -> Self {
        self.ops.push(BatchOp::PutInstance(instance));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Persistence for the orchestration core.
pub trait Store: Send + Sync {
    fn get_job_request(&self, id: &str) -> StoreResult<JobRequest>;

    fn save_job_request(&self, request: &JobRequest) -> StoreResult<()>;

    fn get_chassis(&self, id: &str) -> StoreResult<Chassis>;

    fn save_chassis(&self, chassis: &Chassis) -> StoreResult<()>;

    fn list_chassis(&self, filter: &ChassisFilter) -> StoreResult<Vec<Chassis>>;

    fn get_instance(&self, id: &str) -> StoreResult<Instance>;

    fn save_instance(&self, instance: &Instance) -> StoreResult<()>;

    fn save_flavor_provider(&self, provider: &FlavorProvider) -> StoreResult<()>;

    /// All providers of a flavor, deleted ones included.
    fn list_flavor_providers(&self, flavor_id: &str) -> StoreResult<Vec<FlavorProvider>>;

    /// Apply every op in the batch atomically, after checking its preconditions.
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;
}
