//! Instance lifecycle jobs
//!
//! Both jobs keep `Instance.job_id`/`job_state` pointing at the request acting
//! on the instance, updated under the `/instances/<id>` lock after every save
//! of the request.

use overlord_models::{ChassisState, Instance, InstanceState, JobParams, JobRequest};
use tracing::{debug, info, warn};

use super::{
    Job, JobContext, JobError, JobResult, CREATE_INSTANCE, DECOMMISSION_CHASSIS, DELETE_INSTANCE,
};
use crate::store::WriteBatch;

/// Lock key serializing job pointer updates of one instance
pub fn instance_lock_key(instance_id: &str) -> String {
    format!("/instances/{instance_id}")
}

/// Point the request's instance at the request, or clear the pointer once the
/// request is terminal. `job_state` keeps the terminal state so a failed
/// build stays visible.
pub fn update_instance_pointer(ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
    let instance_id = request.param("instance_id")?;
    let guard = ctx
        .locks
        .acquire(&instance_lock_key(instance_id), ctx.settings.lock_ttl)?;

    let mut instance = match ctx.store.get_instance(instance_id) {
        Ok(instance) => instance,
        Err(e) if e.is_not_found() => {
            warn!(
                instance_id,
                job_request_id = %request.id,
                "instance gone, not updating job pointer"
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    instance.job_id = if request.is_terminal() {
        None
    } else {
        Some(request.id.clone())
    };
    instance.job_state = Some(request.state);
    ctx.store.save_instance(&instance)?;
    debug!(
        instance_id,
        job_request_id = %request.id,
        job_state = %request.state,
        "instance job pointer updated"
    );

    guard.release()?;
    Ok(())
}

fn load_instance(ctx: &JobContext, request: &JobRequest) -> JobResult<Instance> {
    let instance_id = request.param("instance_id")?;
    Ok(ctx.store.get_instance(instance_id)?)
}

/// `instances.create`: reserve a chassis, deploy the image, mark both ACTIVE.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateInstanceJob;

impl Job for CreateInstanceJob {
    fn job_type(&self) -> &str {
        CREATE_INSTANCE
    }

    fn execute(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
        let mut instance = load_instance(ctx, request)?;
        match instance.state {
            InstanceState::Active => {
                info!(instance_id = %instance.id, "instance already active");
                return Ok(());
            }
            InstanceState::Deleting | InstanceState::Deleted => {
                return Err(JobError::InvalidState {
                    kind: "instance",
                    id: instance.id,
                    state: instance.state.to_string(),
                    action: "create",
                });
            }
            InstanceState::Build | InstanceState::Inactive => {}
        }

        // A previous attempt may already hold a chassis
        let mut chassis = match instance.chassis_id.clone() {
            Some(chassis_id) => ctx.store.get_chassis(&chassis_id)?,
            None => ctx.scheduler.reserve_chassis(&mut instance, true)?,
        };

        let image = ctx.images.get_image_info(&instance.image_id)?;
        ctx.network.attach(&chassis, &instance)?;
        ctx.agent.prepare_image(&chassis, &image)?;
        ctx.agent.run_image(&chassis, &image)?;

        instance.state = InstanceState::Active;
        chassis.state = ChassisState::Active;
        ctx.store.write_batch(
            WriteBatch::new()
                .put_instance(instance.clone())
                .put_chassis(chassis.clone()),
        )?;

        info!(instance_id = %instance.id, chassis_id = %chassis.id, "instance active");
        Ok(())
    }

    fn after_save(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
        update_instance_pointer(ctx, request)
    }
}

/// `instances.delete`: detach, free the chassis and queue its decommission.
///
/// A DELETED instance that still names a chassis has not had its
/// decommission queued yet; a retry queues it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteInstanceJob;

impl Job for DeleteInstanceJob {
    fn job_type(&self) -> &str {
        DELETE_INSTANCE
    }

    fn execute(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
        let mut instance = load_instance(ctx, request)?;
        if instance.state != InstanceState::Deleted {
            instance.state = InstanceState::Deleting;
            ctx.store.save_instance(&instance)?;

            let Some(chassis_id) = instance.chassis_id.clone() else {
                instance.state = InstanceState::Deleted;
                ctx.store.save_instance(&instance)?;
                info!(instance_id = %instance.id, "instance deleted, no chassis was reserved");
                return Ok(());
            };

            let mut chassis = ctx.store.get_chassis(&chassis_id)?;
            ctx.network.detach(&chassis, &instance)?;

            // chassis_id stays until the decommission is queued
            instance.state = InstanceState::Deleted;
            chassis.state = ChassisState::Clean;
            chassis.instance_id = None;
            ctx.store.write_batch(
                WriteBatch::new()
                    .put_instance(instance.clone())
                    .put_chassis(chassis),
            )?;
        }

        let Some(chassis_id) = instance.chassis_id.clone() else {
            info!(instance_id = %instance.id, "instance already deleted");
            return Ok(());
        };

        let mut params = JobParams::new();
        params.insert("chassis_id".to_string(), chassis_id.clone());
        let decommission = ctx.client.submit_job(DECOMMISSION_CHASSIS, params)?;

        instance.chassis_id = None;
        ctx.store.save_instance(&instance)?;

        info!(
            instance_id = %instance.id,
            chassis_id = %chassis_id,
            decommission_request_id = %decommission.id,
            "instance deleted, chassis queued for decommission"
        );
        Ok(())
    }

    fn after_save(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
        update_instance_pointer(ctx, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_lock_key() {
        assert_eq!(instance_lock_key("abc"), "/instances/abc");
    }

    #[test]
    fn test_job_types() {
        assert_eq!(CreateInstanceJob.job_type(), "instances.create");
        assert_eq!(DeleteInstanceJob.job_type(), "instances.delete");
        assert_eq!(CreateInstanceJob.max_retries(), None);
    }
}
