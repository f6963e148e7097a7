//! Instance scheduler
//!
//! Picks and reserves one chassis for an instance:
//! 1. Load the flavor's non-deleted providers, highest `schedule_priority` first
//! 2. For the first provider with READY chassis of its model, pick one at random
//! 3. Re-read the chosen chassis and reserve it with one conditional batch write
//!    (instance → BUILD with `chassis_id`, chassis → BUILD with `instance_id`)
//!
//! Reservation is optimistic: the batch only applies while the chassis is still
//! READY, so concurrent callers can never both win the same chassis. A loser
//! sees `Reservation::Conflict` and, when retrying, starts over from step 1.

use std::sync::Arc;

use overlord_models::{Chassis, ChassisState, FlavorProvider, Instance, InstanceState};
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::store::{ChassisFilter, Store, StoreError, WriteBatch};

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Insufficient capacity for flavor {flavor_id}")]
    InsufficientCapacity { flavor_id: String },

    #[error("Chassis {chassis_id} was reserved by another request")]
    ChassisAlreadyReserved { chassis_id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one reservation attempt.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// The chassis now belongs to the instance
    Reserved(Chassis),
    /// Lost the race for this chassis
    Conflict { chassis_id: String },
    /// No READY chassis for any provider of the flavor
    OutOfCapacity,
}

/// Chassis scheduler over a store.
#[derive(Clone)]
pub struct InstanceScheduler {
    store: Arc<dyn Store>,
}

impl InstanceScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reserve a chassis for `instance`, updating it in place on success.
    ///
    /// With `retry`, lost races start the selection over; without it they
    /// surface as `ChassisAlreadyReserved`.
    pub fn reserve_chassis(&self, instance: &mut Instance, retry: bool) -> SchedulerResult<Chassis> {
        loop {
            match self.try_reserve(instance)? {
                Reservation::Reserved(chassis) => return Ok(chassis),
                Reservation::OutOfCapacity => {
                    return Err(SchedulerError::InsufficientCapacity {
                        flavor_id: instance.flavor_id.clone(),
                    })
                }
                Reservation::Conflict { chassis_id } => {
                    if !retry {
                        return Err(SchedulerError::ChassisAlreadyReserved { chassis_id });
                    }
                    debug!(
                        instance_id = %instance.id,
                        chassis_id = %chassis_id,
                        "lost reservation race, selecting again"
                    );
                }
            }
        }
    }

    /// One select-then-reserve attempt.
    pub fn try_reserve(&self, instance: &mut Instance) -> SchedulerResult<Reservation> {
        let Some(candidate) = self.select_chassis(&instance.flavor_id)? else {
            return Ok(Reservation::OutOfCapacity);
        };
        self.mark_chassis_reserved(candidate, instance)
    }

    /// Providers of a flavor that may be scheduled, best first.
    pub fn eligible_providers(&self, flavor_id: &str) -> SchedulerResult<Vec<FlavorProvider>> {
        let mut providers: Vec<FlavorProvider> = self
            .store
            .list_flavor_providers(flavor_id)?
            .into_iter()
            .filter(|p| !p.deleted)
            .collect();
        // Stable sort: ties keep store order
        providers.sort_by(|a, b| b.schedule_priority.cmp(&a.schedule_priority));
        Ok(providers)
    }

    fn select_chassis(&self, flavor_id: &str) -> SchedulerResult<Option<Chassis>> {
        for provider in self.eligible_providers(flavor_id)? {
            let ready = self
                .store
                .list_chassis(&ChassisFilter::ready_for_model(provider.chassis_model_id.clone()))?;

            if let Some(chassis) = ready.choose(&mut rand::thread_rng()) {
                return Ok(Some(chassis.clone()));
            }
        }
        Ok(None)
    }

    fn mark_chassis_reserved(
        &self,
        candidate: Chassis,
        instance: &mut Instance,
    ) -> SchedulerResult<Reservation> {
        let mut chassis = match self.store.get_chassis(&candidate.id) {
            Ok(chassis) => chassis,
            // Deleted between listing and reading: somebody else's change won
            Err(e) if e.is_not_found() => {
                return Ok(Reservation::Conflict {
                    chassis_id: candidate.id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if chassis.state != ChassisState::Ready {
            return Ok(Reservation::Conflict {
                chassis_id: chassis.id,
            });
        }

        let mut reserved_instance = instance.clone();
        reserved_instance.chassis_id = Some(chassis.id.clone());
        reserved_instance.state = InstanceState::Build;
        chassis.state = ChassisState::Build;
        chassis.instance_id = Some(instance.id.clone());

        let batch = WriteBatch::new()
            .expect_chassis_state(chassis.id.clone(), ChassisState::Ready)
            .put_instance(reserved_instance.clone())
            .put_chassis(chassis.clone());

        match self.store.write_batch(batch) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Ok(Reservation::Conflict {
                    chassis_id: chassis.id,
                })
            }
            Err(e) => return Err(e.into()),
        }

        *instance = reserved_instance;
        info!(instance_id = %instance.id, chassis_id = %chassis.id, "chassis reserved");
        Ok(Reservation::Reserved(chassis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use overlord_models::OobCredentials;

    fn chassis(model: &str, state: ChassisState) -> Chassis {
        Chassis::new(
            model,
            OobCredentials {
                host: "bmc".to_string(),
                port: 623,
                username: "u".to_string(),
                password: "p".to_string(),
            },
        )
        .with_state(state)
    }

    fn setup() -> (Arc<MemoryStore>, InstanceScheduler, Instance) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = InstanceScheduler::new(store.clone());
        let instance = Instance::new("web", "flavor-1", "image-1");
        store.save_instance(&instance).unwrap();
        (store, scheduler, instance)
    }

    #[test]
    fn test_out_of_capacity_without_providers() {
        let (_store, scheduler, mut instance) = setup();
        let err = scheduler.reserve_chassis(&mut instance, true).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InsufficientCapacity { flavor_id } if flavor_id == "flavor-1"
        ));
        assert!(instance.chassis_id.is_none());
    }

    #[test]
    fn test_reserves_ready_chassis() {
        let (store, scheduler, mut instance) = setup();
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-a", 10))
            .unwrap();
        let ready = chassis("model-a", ChassisState::Ready);
        store.save_chassis(&ready).unwrap();
        store.save_chassis(&chassis("model-a", ChassisState::Active)).unwrap();

        let reserved = scheduler.reserve_chassis(&mut instance, false).unwrap();
        assert_eq!(reserved.id, ready.id);
        assert_eq!(reserved.state, ChassisState::Build);
        assert_eq!(instance.chassis_id.as_deref(), Some(ready.id.as_str()));
        assert_eq!(instance.state, InstanceState::Build);

        let stored = store.get_chassis(&ready.id).unwrap();
        assert_eq!(stored.state, ChassisState::Build);
        assert_eq!(stored.instance_id.as_deref(), Some(instance.id.as_str()));
        assert_eq!(
            store.get_instance(&instance.id).unwrap().chassis_id,
            instance.chassis_id
        );
    }

    #[test]
    fn test_prefers_higher_priority_provider() {
        let (store, scheduler, mut instance) = setup();
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-low", 1))
            .unwrap();
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-high", 50))
            .unwrap();
        store.save_chassis(&chassis("model-low", ChassisState::Ready)).unwrap();
        let high = chassis("model-high", ChassisState::Ready);
        store.save_chassis(&high).unwrap();

        let reserved = scheduler.reserve_chassis(&mut instance, true).unwrap();
        assert_eq!(reserved.id, high.id);
    }

    #[test]
    fn test_falls_through_to_next_provider() {
        let (store, scheduler, mut instance) = setup();
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-high", 50))
            .unwrap();
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-low", 1))
            .unwrap();
        store.save_chassis(&chassis("model-high", ChassisState::Active)).unwrap();
        let low = chassis("model-low", ChassisState::Ready);
        store.save_chassis(&low).unwrap();

        assert_eq!(scheduler.reserve_chassis(&mut instance, true).unwrap().id, low.id);
    }

    #[test]
    fn test_deleted_providers_are_skipped() {
        let (store, scheduler, mut instance) = setup();
        let mut provider = FlavorProvider::new("flavor-1", "model-a", 10);
        provider.deleted = true;
        store.save_flavor_provider(&provider).unwrap();
        store.save_chassis(&chassis("model-a", ChassisState::Ready)).unwrap();

        assert!(matches!(
            scheduler.reserve_chassis(&mut instance, true),
            Err(SchedulerError::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn test_stale_candidate_is_a_conflict() {
        let (store, scheduler, mut instance) = setup();
        let stale = chassis("model-a", ChassisState::Ready);
        store
            .save_chassis(&stale.clone().with_state(ChassisState::Build))
            .unwrap();

        let outcome = scheduler.mark_chassis_reserved(stale.clone(), &mut instance).unwrap();
        assert!(matches!(outcome, Reservation::Conflict { chassis_id } if chassis_id == stale.id));
        assert!(instance.chassis_id.is_none());
    }

    #[test]
    fn test_random_choice_spreads_load() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = InstanceScheduler::new(store.clone());
        store
            .save_flavor_provider(&FlavorProvider::new("flavor-1", "model-a", 10))
            .unwrap();
        for _ in 0..8 {
            store.save_chassis(&chassis("model-a", ChassisState::Ready)).unwrap();
        }

        let mut picked = std::collections::HashSet::new();
        for _ in 0..64 {
            if let Some(c) = scheduler.select_chassis("flavor-1").unwrap() {
                picked.insert(c.id);
            }
        }
        assert!(picked.len() > 1, "selection should not always pick the same chassis");
    }
}
