//! Instance: a user-requested machine placed on a chassis.

use serde::{Deserialize, Serialize};

use crate::JobRequestState;

/// Instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Accepted, chassis reserved or being reserved
    Build,
    Inactive,
    Active,
    Deleting,
    Deleted,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Build => "BUILD",
            InstanceState::Inactive => "INACTIVE",
            InstanceState::Active => "ACTIVE",
            InstanceState::Deleting => "DELETING",
            InstanceState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub state: InstanceState,

    /// Set if and only if a chassis has been reserved for this instance
    #[serde(default)]
    pub chassis_id: Option<String>,

    pub flavor_id: String,

    pub image_id: String,

    /// The job request currently acting on this instance
    #[serde(default)]
    pub job_id: Option<String>,

    /// State of that job request; keeps the terminal value after `job_id` is cleared
    #[serde(default)]
    pub job_state: Option<JobRequestState>,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        flavor_id: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            state: InstanceState::Build,
            chassis_id: None,
            flavor_id: flavor_id.into(),
            image_id: image_id.into(),
            job_id: None,
            job_state: None,
        }
    }

    /// Whether some job request is currently acting on this instance
    pub fn has_active_job(&self) -> bool {
        self.job_id.is_some()
    }
}
