//! In-memory store backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use overlord_models::{Chassis, FlavorProvider, Instance, JobRequest};

use super::{
    BatchOp, ChassisFilter, Precondition, Store, StoreError, StoreResult, WriteBatch,
};

#[derive(Debug, Default)]
struct MemoryStoreInner {
    job_requests: HashMap<String, JobRequest>,
    chassis: BTreeMap<String, Chassis>,
    instances: HashMap<String, Instance>,
    flavor_providers: Vec<FlavorProvider>,
    /// Remaining writes to reject with `Unavailable`
    failing_writes: u32,
    batches_applied: u64,
}

impl MemoryStoreInner {
    fn check_write(&mut self) -> StoreResult<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn check_precondition(&self, precondition: &Precondition) -> StoreResult<()> {
        match precondition {
            Precondition::ChassisState { chassis_id, state } => {
                let stored = self
                    .chassis
                    .get(chassis_id)
                    .ok_or_else(|| StoreError::not_found("chassis", chassis_id.clone()))?;
                if stored.state != *state {
                    return Err(StoreError::Conflict(format!(
                        "chassis {} is {}, expected {}",
                        chassis_id, stored.state, state
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Thread-safe in-memory repository; every call is one critical section.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject the next `count` writes with `StoreError::Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Number of batches successfully applied.
    pub fn batches_applied(&self) -> u64 {
        self.lock().batches_applied
    }
}

impl Store for MemoryStore {
    fn get_job_request(&self, id: &str) -> StoreResult<JobRequest> {
        self.lock()
            .job_requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("job request", id))
    }

    fn save_job_request(&self, request: &JobRequest) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner
            .job_requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn get_chassis(&self, id: &str) -> StoreResult<Chassis> {
        self.lock()
            .chassis
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("chassis", id))
    }

    fn save_chassis(&self, chassis: &Chassis) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner.chassis.insert(chassis.id.clone(), chassis.clone());
        Ok(())
    }

    fn list_chassis(&self, filter: &ChassisFilter) -> StoreResult<Vec<Chassis>> {
        Ok(self
            .lock()
            .chassis
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn get_instance(&self, id: &str) -> StoreResult<Instance> {
        self.lock()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("instance", id))
    }

    fn save_instance(&self, instance: &Instance) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn save_flavor_provider(&self, provider: &FlavorProvider) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;
        let existing = inner
            .flavor_providers
            .iter()
            .position(|p| p.id == provider.id);
        match existing {
            Some(pos) => inner.flavor_providers[pos] = provider.clone(),
            None => inner.flavor_providers.push(provider.clone()),
        }
        Ok(())
    }

    fn list_flavor_providers(&self, flavor_id: &str) -> StoreResult<Vec<FlavorProvider>> {
        Ok(self
            .lock()
            .flavor_providers
            .iter()
            .filter(|p| p.flavor_id == flavor_id)
            .cloned()
            .collect())
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;

        for precondition in &batch.preconditions {
            inner.check_precondition(precondition)?;
        }

        for op in batch.ops {
            match op {
                BatchOp::PutChassis(c) => {
                    inner.chassis.insert(c.id.clone(), c);
                }
                BatchOp::PutInstance(i) => {
                    inner.instances.insert(i.id.clone(), i);
                }
            }
        }
        inner.batches_applied += 1;
        Ok(())
    }
}
