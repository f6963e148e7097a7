//! Weighted mapping from a flavor to the chassis models that can serve it.

use serde::{Deserialize, Serialize};

/// Maps a flavor to an eligible chassis model with a scheduling weight.
///
/// Higher `schedule_priority` is tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorProvider {
    pub id: String,
    pub flavor_id: String,
    pub chassis_model_id: String,
    pub schedule_priority: i32,
    #[serde(default)]
    pub deleted: bool,
}

impl FlavorProvider {
    pub fn new(
        flavor_id: impl Into<String>,
        chassis_model_id: impl Into<String>,
        schedule_priority: i32,
    ) -> Self {
        Self {
            id: crate::new_id(),
            flavor_id: flavor_id.into(),
            chassis_model_id: chassis_model_id.into(),
            schedule_priority,
            deleted: false,
        }
    }
}
