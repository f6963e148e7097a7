//! Chassis: a physical bare-metal server.

use serde::{Deserialize, Serialize};

/// Chassis lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChassisState {
    /// Freed by a deleted instance, waiting for decommission
    Clean,
    /// Decommissioned and available for scheduling
    Ready,
    /// Reserved for an instance that is being built
    Build,
    /// Running an instance
    Active,
    Deleted,
}

impl ChassisState {
    /// Whether a chassis in this state may reference an instance
    pub fn holds_instance(&self) -> bool {
        matches!(self, ChassisState::Build | ChassisState::Active)
    }
}

impl std::fmt::Display for ChassisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChassisState::Clean => "CLEAN",
            ChassisState::Ready => "READY",
            ChassisState::Build => "BUILD",
            ChassisState::Active => "ACTIVE",
            ChassisState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Management controller credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OobCredentials {
    pub host: String,

    #[serde(default = "default_oob_port")]
    pub port: u16,

    pub username: String,

    pub password: String,
}

fn default_oob_port() -> u16 {
    623
}

// Keep the password out of logs.
impl std::fmt::Debug for OobCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OobCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A physical chassis tracked by the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chassis {
    pub id: String,

    pub state: ChassisState,

    /// Hardware model, matched against flavor providers
    pub chassis_model_id: String,

    /// Weak back-reference; set only while state is BUILD or ACTIVE
    #[serde(default)]
    pub instance_id: Option<String>,

    pub oob: OobCredentials,
}

impl Chassis {
    /// Create a new chassis awaiting decommission
    pub fn new(chassis_model_id: impl Into<String>, oob: OobCredentials) -> Self {
        Self {
            id: crate::new_id(),
            state: ChassisState::Clean,
            chassis_model_id: chassis_model_id.into(),
            instance_id: None,
            oob,
        }
    }

    /// Builder-style state override
    pub fn with_state(mut self, state: ChassisState) -> Self {
        self.state = state;
        self
    }

    /// Check the instance back-reference invariant
    pub fn is_consistent(&self) -> bool {
        self.instance_id.is_none() || self.state.holds_instance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oob() -> OobCredentials {
        OobCredentials {
            host: "10.0.0.5".to_string(),
            port: 623,
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_new_chassis_is_clean() {
        let chassis = Chassis::new("model-a", oob());
        assert_eq!(chassis.state, ChassisState::Clean);
        assert!(chassis.instance_id.is_none());
        assert!(chassis.is_consistent());
    }

    #[test]
    fn test_instance_reference_invariant() {
        let mut chassis = Chassis::new("model-a", oob()).with_state(ChassisState::Ready);
        chassis.instance_id = Some("inst-1".to_string());
        assert!(!chassis.is_consistent());

        chassis.state = ChassisState::Build;
        assert!(chassis.is_consistent());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", oob());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("10.0.0.5"));
    }

    #[test]
    fn test_oob_port_defaults() {
        let creds: OobCredentials = serde_json::from_str(
            r#"{"host":"bmc","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(creds.port, 623);
    }
}
