//! Power driver
//!
//! Issues power and boot-device commands and confirms the resulting state:
//! 1. Send the command and check its acknowledgement
//! 2. Poll the power status up to `max_attempts` times, `wait_time` apart
//! 3. Report whether the target state was observed
//!
//! An unrecognized status string is an error from `is_chassis_on`, while an
//! unrecognized boot-device acknowledgement only yields `false`.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use overlord_models::Chassis;
use regex_lite::Regex;
use tracing::{debug, error, info, warn};

use crate::error::{PowerError, PowerResult};
use crate::runner::CommandRunner;

/// Acknowledgement for `chassis power on`
pub const ACK_POWER_ON: &str = "Chassis Power Control: Up/On";

/// Acknowledgement for `chassis power off`
pub const ACK_POWER_OFF: &str = "Chassis Power Control: Down/Off";

/// Supported boot targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    None,
    Pxe,
    Disk,
    Safe,
    Diag,
    Cdrom,
    Bios,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootDevice::None => "none",
            BootDevice::Pxe => "pxe",
            BootDevice::Disk => "disk",
            BootDevice::Safe => "safe",
            BootDevice::Diag => "diag",
            BootDevice::Cdrom => "cdrom",
            BootDevice::Bios => "bios",
        }
    }
}

impl FromStr for BootDevice {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(BootDevice::None),
            "pxe" => Ok(BootDevice::Pxe),
            "disk" => Ok(BootDevice::Disk),
            "safe" => Ok(BootDevice::Safe),
            "diag" => Ok(BootDevice::Diag),
            "cdrom" => Ok(BootDevice::Cdrom),
            "bios" => Ok(BootDevice::Bios),
            other => Err(PowerError::UnsupportedBootDevice(other.to_string())),
        }
    }
}

impl std::fmt::Display for BootDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmation polling settings
#[derive(Debug, Clone, Copy)]
pub struct PowerDriverConfig {
    /// Status polls after a power command
    pub max_attempts: u32,
    /// Pause between polls
    pub wait_time: Duration,
}

impl Default for PowerDriverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            wait_time: Duration::from_secs(2),
        }
    }
}

fn power_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Chassis Power is (on|off)$").expect("power status regex"))
}

/// Out-of-band power driver bound to one command transport.
#[derive(Clone)]
pub struct PowerDriver {
    runner: Arc<dyn CommandRunner>,
    config: PowerDriverConfig,
}

impl PowerDriver {
    pub fn new(runner: Arc<dyn CommandRunner>, config: PowerDriverConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &PowerDriverConfig {
        &self.config
    }

    /// Query the chassis power state.
    pub fn is_chassis_on(&self, chassis: &Chassis) -> PowerResult<bool> {
        let output = self.runner.run(&chassis.oob, &["chassis", "power", "status"])?;

        match power_status_re()
            .captures(&output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        {
            Some("on") => Ok(true),
            Some("off") => Ok(false),
            _ => {
                error!(chassis_id = %chassis.id, output = %output, "unrecognized power state");
                Err(PowerError::UnexpectedState { output })
            }
        }
    }

    /// Power the chassis on and wait until it reports on.
    ///
    /// Returns `false` when the chassis never reports on within the attempt
    /// budget.
    pub fn power_chassis_on(&self, chassis: &Chassis) -> PowerResult<bool> {
        self.set_power(chassis, true)
    }

    /// Power the chassis off and wait until it reports off.
    pub fn power_chassis_off(&self, chassis: &Chassis) -> PowerResult<bool> {
        self.set_power(chassis, false)
    }

    fn set_power(&self, chassis: &Chassis, on: bool) -> PowerResult<bool> {
        let (verb, expected) = if on {
            ("on", ACK_POWER_ON)
        } else {
            ("off", ACK_POWER_OFF)
        };

        info!(chassis_id = %chassis.id, target = verb, "setting chassis power");
        let output = self.runner.run(&chassis.oob, &["chassis", "power", verb])?;
        if output != expected {
            error!(
                chassis_id = %chassis.id,
                expected,
                output = %output,
                "unexpected power command acknowledgement"
            );
            return Err(PowerError::UnexpectedAcknowledgement {
                expected: expected.to_string(),
                output,
            });
        }

        self.wait_for_power_state(chassis, on)
    }

    fn wait_for_power_state(&self, chassis: &Chassis, on: bool) -> PowerResult<bool> {
        for attempt in 1..=self.config.max_attempts {
            if self.is_chassis_on(chassis)? == on {
                debug!(chassis_id = %chassis.id, attempt, "power state confirmed");
                return Ok(true);
            }
            if attempt < self.config.max_attempts {
                std::thread::sleep(self.config.wait_time);
            }
        }

        warn!(
            chassis_id = %chassis.id,
            target = if on { "on" } else { "off" },
            attempts = self.config.max_attempts,
            "chassis did not reach target power state"
        );
        Ok(false)
    }

    /// Set the next boot device.
    ///
    /// Unknown devices are rejected before anything is sent to the
    /// controller.
    pub fn set_boot_device(
        &self,
        chassis: &Chassis,
        device: &str,
        persistent: bool,
    ) -> PowerResult<bool> {
        let device: BootDevice = device.parse()?;

        let mut args = vec!["chassis", "bootdev", device.as_str()];
        if persistent {
            args.push("options=persistent");
        }

        let output = self.runner.run(&chassis.oob, &args)?;
        let expected = format!("Set Boot Device to {}", device);
        if output != expected {
            error!(
                chassis_id = %chassis.id,
                expected = %expected,
                output = %output,
                "unexpected boot device acknowledgement"
            );
            return Ok(false);
        }

        info!(chassis_id = %chassis.id, device = %device, persistent, "boot device set");
        Ok(true)
    }
}
