//! Chassis lifecycle jobs

use overlord_models::{ChassisState, JobRequest};
use tracing::info;

use super::{Job, JobContext, JobError, JobResult, DECOMMISSION_CHASSIS};
use crate::store::WriteBatch;

const DECOMMISSION_BOOT_DEVICE: &str = "pxe";

/// `chassis.decommission`: network boot the freed chassis into the agent,
/// wipe it and return it to the READY pool.
///
/// Only acts on CLEAN chassis, so a repeat after a completed attempt is a
/// no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecommissionChassisJob;

impl Job for DecommissionChassisJob {
    fn job_type(&self) -> &str {
        DECOMMISSION_CHASSIS
    }

    fn execute(&self, ctx: &JobContext, request: &JobRequest) -> JobResult<()> {
        let chassis_id = request.param("chassis_id")?;
        let mut chassis = ctx.store.get_chassis(chassis_id)?;
        if chassis.state != ChassisState::Clean {
            info!(chassis_id, state = %chassis.state, "chassis not clean, skipping decommission");
            return Ok(());
        }

        if !ctx
            .power
            .set_boot_device(&chassis, DECOMMISSION_BOOT_DEVICE, true)?
        {
            return Err(JobError::BootDeviceNotSet {
                chassis_id: chassis.id,
                device: DECOMMISSION_BOOT_DEVICE.to_string(),
            });
        }

        // Power cycle so the chassis boots from the network
        if !ctx.power.power_chassis_off(&chassis)? {
            return Err(JobError::PowerStateNotReached {
                chassis_id: chassis.id,
                target: "off",
            });
        }
        if !ctx.power.power_chassis_on(&chassis)? {
            return Err(JobError::PowerStateNotReached {
                chassis_id: chassis.id,
                target: "on",
            });
        }

        ctx.agent.decommission(&chassis)?;

        chassis.state = ChassisState::Ready;
        ctx.store.write_batch(
            WriteBatch::new()
                .expect_chassis_state(chassis.id.clone(), ChassisState::Clean)
                .put_chassis(chassis),
        )?;
        info!(chassis_id, "chassis decommissioned and ready");
        Ok(())
    }
}
