//! Command transport for the power driver
//!
//! Abstracts the management-controller channel for testability:
//! - CommandRunner trait: run one command, return its raw textual output
//! - IpmitoolRunner: `ipmitool` subprocess for production
//! - MockRunner (see `mock`): scripted controller for tests

use std::process::{Command, Stdio};

use overlord_models::OobCredentials;

use crate::error::{PowerError, PowerResult};

/// Runs a single management-controller command against one chassis.
pub trait CommandRunner: Send + Sync {
    /// Execute `args` against the controller at `oob` and return its trimmed
    /// output. Non-zero exit or an unreachable controller is an error.
    fn run(&self, oob: &OobCredentials, args: &[&str]) -> PowerResult<String>;
}

/// ipmitool configuration
#[derive(Debug, Clone)]
pub struct IpmitoolConfig {
    /// Path to the ipmitool binary
    pub path: String,
    /// IPMI interface (`-I`)
    pub interface: String,
}

impl Default for IpmitoolConfig {
    fn default() -> Self {
        Self {
            path: "ipmitool".to_string(),
            interface: "lanplus".to_string(),
        }
    }
}

/// ipmitool subprocess transport.
///
/// The password is handed over in `IPMI_PASSWORD` (`-E`) so it never shows
/// up in the process table.
pub struct IpmitoolRunner {
    config: IpmitoolConfig,
}

impl IpmitoolRunner {
    pub fn new(config: IpmitoolConfig) -> Self {
        Self { config }
    }

    /// Build ipmitool arguments
    fn build_args(&self, oob: &OobCredentials, args: &[&str]) -> Vec<String> {
        let mut full = vec![
            "-I".to_string(),
            self.config.interface.clone(),
            "-H".to_string(),
            oob.host.clone(),
            "-p".to_string(),
            oob.port.to_string(),
            "-U".to_string(),
            oob.username.clone(),
            "-E".to_string(),
        ];
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }
}

impl CommandRunner for IpmitoolRunner {
    fn run(&self, oob: &OobCredentials, args: &[&str]) -> PowerResult<String> {
        let output = Command::new(&self.config.path)
            .args(self.build_args(oob, args))
            .env("IPMI_PASSWORD", &oob.password)
            .stdin(Stdio::null())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PowerError::CommandFailed {
                code: output.status.code(),
                output: format!("{}{}", stdout, stderr.trim()),
            });
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oob() -> OobCredentials {
        OobCredentials {
            host: "10.1.2.3".to_string(),
            port: 6230,
            username: "root".to_string(),
            password: "calvin".to_string(),
        }
    }

    #[test]
    fn test_build_args() {
        let runner = IpmitoolRunner::new(IpmitoolConfig::default());
        let args = runner.build_args(&oob(), &["chassis", "power", "status"]);

        assert_eq!(
            args,
            vec![
                "-I", "lanplus", "-H", "10.1.2.3", "-p", "6230", "-U", "root", "-E", "chassis",
                "power", "status"
            ]
        );
        assert!(!args.iter().any(|a| a == "calvin"));
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let runner = IpmitoolRunner::new(IpmitoolConfig {
            path: "/nonexistent/ipmitool-for-tests".to_string(),
            interface: "lanplus".to_string(),
        });
        let err = runner.run(&oob(), &["chassis", "power", "status"]).unwrap_err();
        assert!(matches!(err, PowerError::Io(_)));
        assert!(err.is_transport());
    }

    #[test]
    #[cfg(unix)]
    fn test_non_zero_exit_carries_code() {
        let runner = IpmitoolRunner::new(IpmitoolConfig {
            path: "false".to_string(),
            interface: "lanplus".to_string(),
        });
        match runner.run(&oob(), &["chassis", "power", "status"]) {
            Err(PowerError::CommandFailed { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }
}
