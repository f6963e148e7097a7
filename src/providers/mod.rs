//! Provider capabilities consumed by concrete jobs
//!
//! Image catalog, network fabric and on-host agent RPC. Each is an opaque
//! capability; jobs only rely on the call contracts below, and every call a
//! job may repeat across retries must be idempotent on the provider side.

use overlord_models::{Chassis, Instance};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Image {0} not found")]
    ImageNotFound(String),

    #[error("{provider} request failed: {message}")]
    RequestFailed { provider: &'static str, message: String },

    #[error("{provider} unreachable: {message}")]
    Unreachable { provider: &'static str, message: String },
}

/// Image metadata needed to deploy onto a chassis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    /// Where the agent fetches the image from
    pub url: String,
    /// Checksum the agent verifies after download
    pub checksum: String,
    #[serde(default = "default_disk_format")]
    pub disk_format: String,
}

fn default_disk_format() -> String {
    "raw".to_string()
}

impl ImageInfo {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            checksum: String::new(),
            disk_format: default_disk_format(),
        }
    }
}

pub trait ImageProvider: Send + Sync {
    fn get_image_info(&self, image_id: &str) -> ProviderResult<ImageInfo>;
}

pub trait NetworkProvider: Send + Sync {
    /// Attach the instance's networks to the chassis ports.
    fn attach(&self, chassis: &Chassis, instance: &Instance) -> ProviderResult<()>;

    /// Detach them again; detaching what is not attached is not an error.
    fn detach(&self, chassis: &Chassis, instance: &Instance) -> ProviderResult<()>;
}

/// RPC client for the agent running on a chassis' deploy ramdisk.
pub trait AgentClient: Send + Sync {
    /// Stage the image onto local disk.
    fn prepare_image(&self, chassis: &Chassis, image: &ImageInfo) -> ProviderResult<()>;

    /// Boot into the staged image.
    fn run_image(&self, chassis: &Chassis, image: &ImageInfo) -> ProviderResult<()>;

    /// Wipe local disks and return the chassis to a pristine state.
    fn decommission(&self, chassis: &Chassis) -> ProviderResult<()>;
}

/// Provider that accepts every call; used by the standalone binary where no
/// real image, network or agent backends are wired in.
#[derive(Debug, Clone, Default)]
pub struct NoopProvider;

impl ImageProvider for NoopProvider {
    fn get_image_info(&self, image_id: &str) -> ProviderResult<ImageInfo> {
        debug!(image_id, "noop image lookup");
        Ok(ImageInfo::new(image_id, format!("file:///var/lib/overlord/images/{image_id}")))
    }
}

impl NetworkProvider for NoopProvider {
    fn attach(&self, chassis: &Chassis, instance: &Instance) -> ProviderResult<()> {
        debug!(chassis_id = %chassis.id, instance_id = %instance.id, "noop network attach");
        Ok(())
    }

    fn detach(&self, chassis: &Chassis, instance: &Instance) -> ProviderResult<()> {
        debug!(chassis_id = %chassis.id, instance_id = %instance.id, "noop network detach");
        Ok(())
    }
}

impl AgentClient for NoopProvider {
    fn prepare_image(&self, chassis: &Chassis, image: &ImageInfo) -> ProviderResult<()> {
        debug!(chassis_id = %chassis.id, image_id = %image.id, "noop prepare image");
        Ok(())
    }

    fn run_image(&self, chassis: &Chassis, image: &ImageInfo) -> ProviderResult<()> {
        debug!(chassis_id = %chassis.id, image_id = %image.id, "noop run image");
        Ok(())
    }

    fn decommission(&self, chassis: &Chassis) -> ProviderResult<()> {
        debug!(chassis_id = %chassis.id, "noop decommission");
        Ok(())
    }
}
