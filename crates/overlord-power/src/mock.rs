//! Scripted management controller for tests.
//!
//! Simulates ipmitool against an in-memory set of controllers keyed by host:
//! power commands are acknowledged immediately but the reported state only
//! flips after a configurable number of status polls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use overlord_models::OobCredentials;

use crate::driver::{ACK_POWER_OFF, ACK_POWER_ON};
use crate::error::{PowerError, PowerResult};
use crate::runner::CommandRunner;

#[derive(Debug, Clone, Default)]
struct Controller {
    powered_on: bool,
    /// Target state and the number of status polls left before it applies
    pending: Option<(bool, Option<u32>)>,
}

#[derive(Debug, Default)]
struct MockRunnerInner {
    controllers: HashMap<String, Controller>,
    calls: Vec<Vec<String>>,
    /// Status polls before a power change becomes visible (`None` = never)
    settle_polls: Option<u32>,
    ack_override: Option<String>,
    status_override: Option<String>,
    bootdev_ack_override: Option<String>,
    fail_with: Option<(i32, String)>,
}

/// Thread-safe scripted controller.
#[derive(Debug, Clone)]
pub struct MockRunner {
    inner: Arc<Mutex<MockRunnerInner>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Controllers start powered off and settle on the first status poll.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockRunnerInner {
                settle_polls: Some(0),
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockRunnerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of status polls before a power change is reported.
    pub fn set_settle_polls(&self, polls: u32) {
        self.lock().settle_polls = Some(polls);
    }

    /// Power changes are acknowledged but never take effect.
    pub fn set_stuck(&self) {
        self.lock().settle_polls = None;
    }

    /// Answer power commands with this text instead of the real acknowledgement.
    pub fn set_ack_override(&self, ack: impl Into<String>) {
        self.lock().ack_override = Some(ack.into());
    }

    /// Answer status queries with this text.
    pub fn set_status_override(&self, status: impl Into<String>) {
        self.lock().status_override = Some(status.into());
    }

    /// Answer boot device commands with this text.
    pub fn set_bootdev_ack_override(&self, ack: impl Into<String>) {
        self.lock().bootdev_ack_override = Some(ack.into());
    }

    /// Fail every command as if ipmitool exited with `code`.
    pub fn fail_with(&self, code: i32, output: impl Into<String>) {
        self.lock().fail_with = Some((code, output.into()));
    }

    /// Undo `fail_with`.
    pub fn clear_failure(&self) {
        self.lock().fail_with = None;
    }

    pub fn set_powered_on(&self, host: &str, on: bool) {
        let mut inner = self.lock();
        let controller = inner.controllers.entry(host.to_string()).or_default();
        controller.powered_on = on;
        controller.pending = None;
    }

    pub fn is_powered_on(&self, host: &str) -> bool {
        self.lock()
            .controllers
            .get(host)
            .map(|c| c.powered_on)
            .unwrap_or(false)
    }

    /// Every command issued so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, oob: &OobCredentials, args: &[&str]) -> PowerResult<String> {
        let mut inner = self.lock();
        inner.calls.push(args.iter().map(|a| a.to_string()).collect());

        if let Some((code, output)) = inner.fail_with.clone() {
            return Err(PowerError::CommandFailed {
                code: Some(code),
                output,
            });
        }

        let settle = inner.settle_polls;
        let ack_override = inner.ack_override.clone();
        let status_override = inner.status_override.clone();
        let bootdev_ack_override = inner.bootdev_ack_override.clone();
        let controller = inner.controllers.entry(oob.host.clone()).or_default();

        match args {
            ["chassis", "power", "status"] => {
                if let Some(status) = status_override {
                    return Ok(status);
                }
                if let Some((target, remaining)) = controller.pending {
                    match remaining {
                        Some(0) => {
                            controller.powered_on = target;
                            controller.pending = None;
                        }
                        Some(n) => controller.pending = Some((target, Some(n - 1))),
                        None => {}
                    }
                }
                let state = if controller.powered_on { "on" } else { "off" };
                Ok(format!("Chassis Power is {}", state))
            }
            ["chassis", "power", verb @ ("on" | "off")] => {
                let target = *verb == "on";
                controller.pending = Some((target, settle));
                let ack = if target { ACK_POWER_ON } else { ACK_POWER_OFF };
                Ok(ack_override.unwrap_or_else(|| ack.to_string()))
            }
            ["chassis", "bootdev", device, ..] => Ok(bootdev_ack_override
                .unwrap_or_else(|| format!("Set Boot Device to {}", device))),
            _ => Err(PowerError::CommandFailed {
                code: Some(1),
                output: format!("Invalid command: {}", args.join(" ")),
            }),
        }
    }
}
